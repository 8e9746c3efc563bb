//! Sea-ORM entity definitions for every durable table the metadata store owns (§4.B).

pub mod branch;
pub mod file_head;
pub mod ignore_rule;
pub mod meta;
pub mod search_term;
pub mod tag;
pub mod version;

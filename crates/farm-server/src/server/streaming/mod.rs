//! Producer tasks behind the streaming call shapes.
//!
//! - [`coordinator`] - feeds stored records into a server-streaming response.
//! - [`processor`] - consumes client streams (summaries and chat relay).

pub mod coordinator;
pub mod processor;

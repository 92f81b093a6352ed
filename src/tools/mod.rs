//! Local and remote tools the agents can call.
//!
//! - `web_search`: Google results through the Serper API
//! - `search_wikipedia`: article summaries from the MediaWiki API
//! - `save_info` / `load_info` / `list_info`: a JSON key-value note store
//! - `save_text_to_file`: append research output to a text file

pub mod notes;
pub mod save_file;
pub mod serper;
pub mod wikipedia;

pub use notes::{notes_toolkit, NoteStore};
pub use save_file::SaveTextTool;
pub use serper::{SearchResult, SerperSearchTool};
pub use wikipedia::WikipediaSearchTool;

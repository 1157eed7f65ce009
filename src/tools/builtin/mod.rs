//! Built-in tools
//!
//! Ready-made descriptors for common agent capabilities. Handlers are async
//! and report failures as errors, which surface as tool-result errors.
//!
//! - [`file_tools`]: `read_file`, `write_file`, `list_files`
//! - [`web_tools`]: `fetch_url`
//! - [`shell_tools`]: `execute_shell`, which runs arbitrary commands and
//!   should only be given to agents in trusted environments

pub mod files;
pub mod shell;
pub mod web;

pub use files::file_tools;
pub use shell::shell_tools;
pub use web::{fetch_url_tool, web_tools};

/// Cut `text` to at most `max` characters
///
/// Returns the kept prefix and whether anything was dropped.
pub(crate) fn truncate_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((end, _)) => (&text[..end], true),
        None => (text, false),
    }
}

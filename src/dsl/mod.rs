//! DSL front end: lexer and recursive-descent parser.
//!
//! The plan DSL is a small declaration language: `node` blocks describe
//! hosts, `task` blocks describe resources to converge on them. No loops,
//! functions or expressions beyond literals, lists and maps.
//!
//! ```text
//! node 'web1' { connection => local }
//!
//! task 'base' on 'web1' {
//!   package { ['nginx', 'curl']: ensure => present }
//!   file { '/etc/motd': ensure => present, content => "managed\n" }
//! }
//! ```

pub mod lexer;
pub mod parser;

pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;

use crate::error::Result;
use crate::plan::Plan;

/// Parses DSL source text into a [`Plan`].
pub fn parse(source: &str) -> Result<Plan> {
    Parser::new(source)?.parse()
}

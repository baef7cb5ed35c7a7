//! A small classic-script interpreter covering what page scripts and test
//! scripts typically use: ES2015+ syntax without classes or generators, the
//! common built-ins, and DOM bindings backed by [`crate::dom::Dom`].

use super::*;

mod ast;
mod builtins;
mod exec;
mod host;
mod lexer;
mod parser;
mod value;

pub(crate) use ast::*;
pub(crate) use exec::{Abrupt, Eval, STACK_GROWTH, STACK_RED_ZONE, describe_thrown, throw};
pub(crate) use lexer::{Spanned, TemplatePart, Token, tokenize};
pub(crate) use parser::parse_program;
pub(crate) use value::*;

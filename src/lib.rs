#![allow(clippy::collapsible_if)]
#![deny(dead_code)]

pub mod batch;
pub mod document;
pub mod editor;
pub mod indentation;
pub mod pruner;
pub mod selector;

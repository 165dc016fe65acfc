pub mod expansion;

pub use expansion::{expand_all, ExpansionSettings, Expander, SubfinderExpander};

//! Statement templates: the JSON schema describing line items and their
//! formulas for one kind of statement.

pub mod statement;

pub use statement::{LineItem, StatementTemplate, TemplateMetadata, TemplateRule};

//! Reconciliation core: mapping tables, normalization and diffing

pub mod diff;
pub mod mapping;
pub mod normalize;
pub mod tables;

pub use diff::{DiffOp, diff, values_equal};
pub use mapping::{
    Applicability, ConflictContext, ConflictGroup, ContextSelector, FieldMapping, FieldSpec,
    FieldType, Mappings, Reset, always, canonical_address_list, parse_bool,
};
pub use normalize::normalize;
pub use tables::{
    DEFAULT_MAILBOX_SIZE, account_mapping, alias_mapping, hosted_mail_mappings, spam_acl_mapping,
    spam_settings_mapping,
};

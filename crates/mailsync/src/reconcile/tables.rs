//! Mapping tables for the hosted mail API
//!
//! Account reads come back nested (`contactInfo.*`) with a forwarding list
//! under a different name than the write endpoint accepts; alias reads come
//! back in one of two shapes depending on how many members the alias has.
//! Spam settings read under `rsEmailSettings` and write as `rsEmail.*`.

use serde_json::{Value, json};

use super::mapping::{
    ConflictContext, ConflictGroup, FieldMapping, FieldSpec, FieldType, Mappings,
};
use crate::error::SyncError;
use crate::models::NormalizedRecord;

/// Attributes stored under `contactInfo` in account reads: (read path, write name)
const CONTACT_FIELDS: &[(&str, &str)] = &[
    ("contactInfo.businessCity", "businessCity"),
    ("contactInfo.businessCountry", "businessCountry"),
    ("contactInfo.businessNumber", "businessNumber"),
    ("contactInfo.businessPostalCode", "businessPostalCode"),
    ("contactInfo.businessState", "businessState"),
    ("contactInfo.businessStreet", "businessStreet"),
    ("contactInfo.customID", "customID"),
    ("contactInfo.employeeType", "employeeType"),
    ("contactInfo.faxNumber", "faxNumber"),
    ("contactInfo.firstName", "firstName"),
    ("contactInfo.generationQualifier", "generationQualifier"),
    ("contactInfo.homeCity", "homeCity"),
    ("contactInfo.homeCountry", "homeCountry"),
    ("contactInfo.homeFaxNumber", "homeFaxNumber"),
    ("contactInfo.homeNumber", "homeNumber"),
    ("contactInfo.homePostalAddress", "homePostalAddress"),
    ("contactInfo.homePostalCode", "homePostalCode"),
    ("contactInfo.homeState", "homeState"),
    ("contactInfo.homeStreet", "homeStreet"),
    ("contactInfo.initials", "initials"),
    ("contactInfo.lastName", "lastName"),
    ("contactInfo.mobileNumber", "mobileNumber"),
    ("contactInfo.notes", "notes"),
    ("contactInfo.organization", "organization"),
    ("contactInfo.organizationUnit", "organizationUnit"),
    ("contactInfo.organizationalStatus", "organizationalStatus"),
    ("contactInfo.pagerNumber", "pagerNumber"),
    ("contactInfo.personalTitle", "personalTitle"),
    ("contactInfo.title", "title"),
    ("contactInfo.userID", "userID"),
];

/// Default quota for new mailboxes, in MB
pub const DEFAULT_MAILBOX_SIZE: i64 = 25600;

fn vacation_context(record: &NormalizedRecord) -> Option<&'static str> {
    match record.get("enableVacationMessage")? {
        Value::Bool(true) => Some("on"),
        Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Some("on"),
        _ => Some("off"),
    }
}

fn forwarding_context(record: &NormalizedRecord) -> Option<&'static str> {
    match record.get("enableForwardingAddresses")? {
        Value::String(s) if !s.is_empty() => Some("forwarding"),
        _ => Some("local"),
    }
}

fn spam_handling_context(record: &NormalizedRecord) -> Option<&'static str> {
    match record.get("rsEmail.spamHandling")?.as_str()? {
        "toFolder" => Some("folder"),
        "toAddress" => Some("address"),
        _ => Some("other"),
    }
}

fn single_member(raw: &Value) -> bool {
    raw.get("numberOfMembers").and_then(Value::as_u64) == Some(1)
}

/// Build the account table
pub fn account_mapping() -> Result<FieldMapping, SyncError> {
    // enabled, size and the visibility flags always carry a desired default
    let mut fields = vec![
        FieldSpec::same("displayName", FieldType::Str).resets(),
        FieldSpec::same("enabled", FieldType::Bool).coercible(),
        FieldSpec::same("enableVacationMessage", FieldType::Bool).coercible().resets(),
        FieldSpec::same("vacationMessage", FieldType::Str).resets(),
        FieldSpec::same("saveForwardedEmail", FieldType::Bool).coercible().resets(),
        FieldSpec::same("size", FieldType::Int),
        FieldSpec::same("visibleInExchangeGAL", FieldType::Bool).coercible(),
        FieldSpec::same("visibleInRackspaceEmailCompanyDirectory", FieldType::Bool).coercible(),
        FieldSpec::new(
            "emailForwardingAddressList",
            "enableForwardingAddresses",
            FieldType::AddressList,
        )
        .resets(),
        FieldSpec::same("password", FieldType::Str).write_only(),
        FieldSpec::same("recoverDeleted", FieldType::Bool).coercible().write_only(),
    ];
    fields.extend(
        CONTACT_FIELDS
            .iter()
            .map(|&(path, name)| FieldSpec::new(path, name, FieldType::Str).resets()),
    );

    let groups = vec![
        ConflictGroup {
            name: "vacation",
            reads: &["enableVacationMessage"],
            contexts: &[
                ConflictContext {
                    name: "on",
                    fields: &["enableVacationMessage", "vacationMessage"],
                },
                ConflictContext {
                    name: "off",
                    fields: &["enableVacationMessage"],
                },
            ],
            select: vacation_context,
        },
        ConflictGroup {
            name: "forwarding",
            reads: &["enableForwardingAddresses"],
            contexts: &[
                ConflictContext {
                    name: "forwarding",
                    fields: &["enableForwardingAddresses", "saveForwardedEmail"],
                },
                ConflictContext {
                    name: "local",
                    fields: &["enableForwardingAddresses"],
                },
            ],
            select: forwarding_context,
        },
    ];

    Ok(FieldMapping::new(fields, groups)?.with_required(&["password", "size"]))
}

/// Build the alias table
pub fn alias_mapping() -> Result<FieldMapping, SyncError> {
    FieldMapping::new(
        vec![
            FieldSpec::new("singleMemberName", "aliasEmails", FieldType::AddressList)
                .when(single_member),
            FieldSpec::new(
                "emailAddressList.emailAddress",
                "aliasEmails",
                FieldType::AddressList,
            ),
        ],
        vec![],
    )
}

/// Build the mailbox spam settings table
///
/// The settings endpoint resets anything a write leaves out, so updates
/// carry every setting. Omitted settings go back to the service defaults.
pub fn spam_settings_mapping() -> Result<FieldMapping, SyncError> {
    let fields = vec![
        FieldSpec::same("filterLevel", FieldType::Str).resets_to(|| json!("on")),
        FieldSpec::new("rsEmailSettings.spamHandling", "rsEmail.spamHandling", FieldType::Str)
            .resets_to(|| json!("toFolder")),
        FieldSpec::new("rsEmailSettings.hasFolderCleaner", "rsEmail.hasFolderCleaner", FieldType::Bool)
            .coercible()
            .resets_to(|| json!(true)),
        FieldSpec::new("rsEmailSettings.spamFolderAgeLimit", "rsEmail.spamFolderAgeLimit", FieldType::Int)
            .resets_to(|| json!(7)),
        FieldSpec::new("rsEmailSettings.spamFolderNumLimit", "rsEmail.spamFolderNumLimit", FieldType::Int)
            .resets_to(|| json!(250)),
        FieldSpec::new(
            "rsEmailSettings.spamForwardingAddress",
            "rsEmail.spamForwardingAddress",
            FieldType::Str,
        )
        .resets(),
    ];

    // Folder cleanup and a forwarding address exclude each other
    let groups = vec![ConflictGroup {
        name: "spam handling",
        reads: &["rsEmail.spamHandling"],
        contexts: &[
            ConflictContext {
                name: "folder",
                fields: &[
                    "rsEmail.spamHandling",
                    "rsEmail.hasFolderCleaner",
                    "rsEmail.spamFolderAgeLimit",
                    "rsEmail.spamFolderNumLimit",
                ],
            },
            ConflictContext {
                name: "address",
                fields: &["rsEmail.spamHandling", "rsEmail.spamForwardingAddress"],
            },
            ConflictContext {
                name: "other",
                fields: &[
                    "rsEmail.spamHandling",
                    "rsEmail.hasFolderCleaner",
                    "rsEmail.spamFolderAgeLimit",
                    "rsEmail.spamFolderNumLimit",
                    "rsEmail.spamForwardingAddress",
                ],
            },
        ],
        select: spam_handling_context,
    }];

    Ok(FieldMapping::new(fields, groups)?.with_full_updates())
}

/// Build the table shared by the block and safe lists
pub fn spam_acl_mapping() -> Result<FieldMapping, SyncError> {
    FieldMapping::new(
        vec![FieldSpec::same("addresses", FieldType::AddressList).resets()],
        vec![],
    )
}

/// Tables for every resource kind
pub fn hosted_mail_mappings() -> Result<Mappings, SyncError> {
    Ok(Mappings::new(account_mapping()?, alias_mapping()?)
        .with_spam(spam_settings_mapping()?, spam_acl_mapping()?))
}

//! Resolved, read-only rule tables consumed by the validator.
//!
//! Built once per run by `io::config` and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::types::{ReasonCode, field};

/// VAT code used when the rule set allows defaulting and declares no override.
pub const BUILTIN_DEFAULT_VAT_CODE: &str = "T1";
/// Standard UK rate applied by the built-in default code.
pub const BUILTIN_DEFAULT_VAT_RATE: Decimal = Decimal::from_parts(20, 0, 0, false, 0);

/// Per-supplier schema and defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierDefinition {
    pub id: String,
    pub name: String,
    /// Canonical field names that must be present and non-empty.
    pub required_fields: Vec<String>,
    /// Canonical field name -> column/key used by this supplier's sources.
    pub columns: BTreeMap<String, String>,
    pub default_vat_code: Option<String>,
    pub default_works_type: Option<String>,
    /// Credit-note suppliers have their amounts emitted negated.
    pub credit_note: bool,
}

impl SupplierDefinition {
    /// Source key holding canonical `name` for this supplier, if remapped.
    pub fn column_for(&self, name: &str) -> Option<&str> {
        self.columns.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VatRule {
    pub code: String,
    /// Percentage, e.g. `20` for 20%.
    pub rate: Decimal,
    pub label: String,
}

/// VAT code table plus the defaulting policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VatTable {
    pub rules: BTreeMap<String, VatRule>,
    pub allow_default: bool,
    pub default_code: String,
}

impl Default for VatTable {
    fn default() -> Self {
        Self {
            rules: BTreeMap::new(),
            allow_default: true,
            default_code: BUILTIN_DEFAULT_VAT_CODE.to_string(),
        }
    }
}

impl VatTable {
    /// Rule for an explicit code. While defaulting is allowed, the built-in
    /// default code resolves even when the table does not list it.
    pub fn get(&self, code: &str) -> Option<VatRule> {
        if let Some(rule) = self.rules.get(code) {
            return Some(rule.clone());
        }
        (self.allow_default && code == BUILTIN_DEFAULT_VAT_CODE && code == self.default_code)
            .then(Self::builtin_default)
    }

    /// Rule applied when neither the record nor the supplier names a code.
    pub fn default_rule(&self) -> Option<VatRule> {
        if !self.allow_default {
            return None;
        }
        self.get(&self.default_code)
    }

    fn builtin_default() -> VatRule {
        VatRule {
            code: BUILTIN_DEFAULT_VAT_CODE.to_string(),
            rate: BUILTIN_DEFAULT_VAT_RATE,
            label: "Standard rate".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorksTypeRule {
    pub code: String,
    pub label: String,
    /// Lowercase keywords matched against the invoice description.
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorksTypeTable {
    /// Ordered; the first rule with a matching keyword wins.
    pub rules: Vec<WorksTypeRule>,
    pub fallback: String,
}

impl Default for WorksTypeTable {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            fallback: "OTHER".to_string(),
        }
    }
}

impl WorksTypeTable {
    pub fn contains(&self, code: &str) -> bool {
        self.rules.iter().any(|rule| rule.code == code)
    }
}

/// One validator check. The order of checks decides which reason is reported
/// when several fail at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    MissingField,
    BadAmount,
    BadDate,
    VatMismatch,
    TotalMismatch,
    UnknownWorksType,
    UnknownSupplier,
}

impl Check {
    /// Default priority: missing field > bad amount > bad date > VAT mismatch >
    /// total mismatch > unknown works type > unknown supplier.
    pub const DEFAULT_ORDER: [Check; 7] = [
        Check::MissingField,
        Check::BadAmount,
        Check::BadDate,
        Check::VatMismatch,
        Check::TotalMismatch,
        Check::UnknownWorksType,
        Check::UnknownSupplier,
    ];

    pub fn reason(self) -> ReasonCode {
        match self {
            Check::MissingField => ReasonCode::MissingField,
            Check::BadAmount => ReasonCode::BadAmount,
            Check::BadDate => ReasonCode::BadDate,
            Check::VatMismatch => ReasonCode::VatMismatch,
            Check::TotalMismatch => ReasonCode::TotalMismatch,
            Check::UnknownWorksType => ReasonCode::UnknownWorksType,
            Check::UnknownSupplier => ReasonCode::UnknownSupplier,
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Check::MissingField => "missing_field",
            Check::BadAmount => "bad_amount",
            Check::BadDate => "bad_date",
            Check::VatMismatch => "vat_mismatch",
            Check::TotalMismatch => "total_mismatch",
            Check::UnknownWorksType => "unknown_works_type",
            Check::UnknownSupplier => "unknown_supplier",
        };
        f.write_str(name)
    }
}

/// Numeric and ordering knobs for the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSettings {
    pub currency_precision: u32,
    pub tolerance: Decimal,
    pub check_order: Vec<Check>,
    /// `chrono` formats tried in order when parsing invoice dates.
    pub date_formats: Vec<String>,
    /// Required fields applied when the supplier is not in the table.
    pub baseline_required: Vec<String>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            currency_precision: 2,
            tolerance: Decimal::new(1, 2),
            check_order: Check::DEFAULT_ORDER.to_vec(),
            date_formats: default_date_formats(),
            baseline_required: vec![
                field::INVOICE_NUMBER.to_string(),
                field::DATE.to_string(),
                field::NET.to_string(),
            ],
        }
    }
}

pub fn default_date_formats() -> Vec<String> {
    ["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y", "%d %b %Y", "%d-%b-%Y"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// The complete resolved rule set for one run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleTable {
    pub version: String,
    pub suppliers: BTreeMap<String, SupplierDefinition>,
    pub vat: VatTable,
    pub works_types: WorksTypeTable,
    pub settings: ValidationSettings,
}

impl RuleTable {
    pub fn supplier(&self, id: &str) -> Option<&SupplierDefinition> {
        self.suppliers.get(id)
    }
}

/// Parse a percentage such as `"20"` or `"17.5"`.
pub fn parse_rate(raw: &str) -> Result<Decimal, String> {
    let rate = Decimal::from_str(raw.trim()).map_err(|err| format!("'{raw}': {err}"))?;
    if rate.is_sign_negative() || rate > Decimal::ONE_HUNDRED {
        return Err(format!("'{raw}' must be between 0 and 100"));
    }
    Ok(rate)
}

//! Rule file loading (`configs/rules.toml` by default).
//!
//! The TOML file is parsed into plain serde sections, validated, and resolved
//! into the read-only [`RuleTable`] plus the compiled text-extraction profiles.
//! Any defect is fatal: a run never starts with a partially understood rule set.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::core::rules::{
    Check, RuleTable, SupplierDefinition, ValidationSettings, VatRule, VatTable, WorksTypeRule,
    WorksTypeTable, default_date_formats, parse_rate,
};
use crate::core::types::field;
use crate::identity::identify;
use crate::io::extract::{ExtractionProfile, TextExtractor};
use crate::ledger::RulesetInfo;

pub const DEFAULT_RULES_PATH: &str = "configs/rules.toml";
/// Highest currency precision accepted in `settings.currency_precision`.
pub const MAX_PRECISION: u32 = 6;

/// Rule file as written by humans. Missing sections take their defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RulesFile {
    pub version: String,
    pub settings: SettingsSection,
    pub sources: SourcesSection,
    pub vat: VatSection,
    pub works_types: Vec<WorksTypeEntry>,
    pub suppliers: BTreeMap<String, SupplierEntry>,
    pub extraction: Vec<ExtractionEntry>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsSection {
    pub currency_precision: u32,
    /// Decimal string, e.g. `"0.01"`.
    pub tolerance: String,
    pub check_order: Vec<Check>,
    pub date_formats: Vec<String>,
    pub baseline_required: Vec<String>,
    pub works_type_fallback: String,
}

impl Default for SettingsSection {
    fn default() -> Self {
        let defaults = ValidationSettings::default();
        Self {
            currency_precision: defaults.currency_precision,
            tolerance: defaults.tolerance.to_string(),
            check_order: defaults.check_order,
            date_formats: default_date_formats(),
            baseline_required: defaults.baseline_required,
            works_type_fallback: WorksTypeTable::default().fallback,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SourcesSection {
    /// Smartsheet column holding the supplier id.
    pub supplier_column: String,
}

impl Default for SourcesSection {
    fn default() -> Self {
        Self {
            supplier_column: "Supplier ID".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VatSection {
    pub allow_default: bool,
    pub default_code: String,
    pub codes: Vec<VatCodeEntry>,
}

impl Default for VatSection {
    fn default() -> Self {
        let table = VatTable::default();
        Self {
            allow_default: table.allow_default,
            default_code: table.default_code,
            codes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VatCodeEntry {
    pub code: String,
    /// Percentage as a decimal string, e.g. `"17.5"`.
    pub rate: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorksTypeEntry {
    pub code: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SupplierEntry {
    pub name: Option<String>,
    /// Falls back to `settings.baseline_required` when omitted.
    pub required_fields: Option<Vec<String>>,
    pub columns: BTreeMap<String, String>,
    pub default_vat_code: Option<String>,
    pub default_works_type: Option<String>,
    pub credit_note: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExtractionEntry {
    pub supplier: String,
    pub marker: String,
    #[serde(default)]
    pub patterns: BTreeMap<String, String>,
}

/// Source adapter settings that are not validation rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub supplier_column: String,
}

/// Everything a run needs from the rule file.
#[derive(Debug, Clone)]
pub struct LoadedRuleset {
    pub rules: RuleTable,
    pub extractor: TextExtractor,
    pub sources: SourceSettings,
    pub info: RulesetInfo,
}

/// Load and validate the rule file at `path`. A missing file is an error.
pub fn load_ruleset(path: &Path) -> Result<LoadedRuleset> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let contents =
        std::str::from_utf8(&bytes).with_context(|| format!("decode {}", path.display()))?;
    let loaded = parse_ruleset(contents, identify(&bytes))
        .with_context(|| format!("load rules {}", path.display()))?;
    debug!(
        path = %path.display(),
        version = %loaded.info.version,
        suppliers = loaded.rules.suppliers.len(),
        "rules loaded"
    );
    Ok(loaded)
}

/// Parse rule-file text; `sha256` is the digest of the file bytes.
pub fn parse_ruleset(contents: &str, sha256: String) -> Result<LoadedRuleset> {
    let file: RulesFile = toml::from_str(contents).context("parse rules toml")?;
    resolve(file, sha256)
}

fn resolve(file: RulesFile, sha256: String) -> Result<LoadedRuleset> {
    if file.version.trim().is_empty() {
        bail!("version must be a non-empty string");
    }
    let settings = resolve_settings(&file.settings)?;
    let vat = resolve_vat(&file.vat)?;
    let works_types = resolve_works_types(&file.works_types, &file.settings)?;

    let mut suppliers = BTreeMap::new();
    for (id, entry) in &file.suppliers {
        let supplier = resolve_supplier(id, entry, &settings, &vat, &works_types)
            .with_context(|| format!("supplier '{id}'"))?;
        suppliers.insert(id.clone(), supplier);
    }

    let extractor = resolve_extraction(&file.extraction, &suppliers)?;

    if file.sources.supplier_column.trim().is_empty() {
        bail!("sources.supplier_column must be non-empty");
    }

    Ok(LoadedRuleset {
        info: RulesetInfo {
            version: file.version.clone(),
            sha256,
        },
        rules: RuleTable {
            version: file.version,
            suppliers,
            vat,
            works_types,
            settings,
        },
        extractor,
        sources: SourceSettings {
            supplier_column: file.sources.supplier_column,
        },
    })
}

fn resolve_settings(section: &SettingsSection) -> Result<ValidationSettings> {
    if section.currency_precision > MAX_PRECISION {
        bail!("settings.currency_precision must be <= {MAX_PRECISION}");
    }
    let tolerance = Decimal::from_str(section.tolerance.trim())
        .map_err(|err| anyhow!("settings.tolerance '{}': {err}", section.tolerance))?;
    if tolerance.is_sign_negative() {
        bail!("settings.tolerance must be >= 0");
    }

    let mut seen = HashSet::new();
    for check in &section.check_order {
        if !seen.insert(*check) {
            bail!("settings.check_order lists '{check}' twice");
        }
    }
    if let Some(missing) = Check::DEFAULT_ORDER
        .iter()
        .find(|check| !seen.contains(*check))
    {
        bail!("settings.check_order is missing '{missing}'");
    }

    if section.date_formats.is_empty() {
        bail!("settings.date_formats must list at least one format");
    }
    if section.baseline_required.is_empty() {
        bail!("settings.baseline_required must be non-empty");
    }
    ensure_canonical(&section.baseline_required, "settings.baseline_required")?;
    if section.works_type_fallback.trim().is_empty() {
        bail!("settings.works_type_fallback must be non-empty");
    }

    Ok(ValidationSettings {
        currency_precision: section.currency_precision,
        tolerance,
        check_order: section.check_order.clone(),
        date_formats: section.date_formats.clone(),
        baseline_required: section.baseline_required.clone(),
    })
}

fn resolve_vat(section: &VatSection) -> Result<VatTable> {
    let mut rules = BTreeMap::new();
    for entry in &section.codes {
        let code = entry.code.trim();
        if code.is_empty() {
            bail!("vat.codes entries need a non-empty code");
        }
        let rate = parse_rate(&entry.rate).map_err(|err| anyhow!("vat code '{code}': rate {err}"))?;
        let rule = VatRule {
            code: code.to_string(),
            rate,
            label: entry.label.clone(),
        };
        if rules.insert(code.to_string(), rule).is_some() {
            bail!("vat code '{code}' is declared twice");
        }
    }

    let table = VatTable {
        rules,
        allow_default: section.allow_default,
        default_code: section.default_code.trim().to_string(),
    };
    if table.allow_default && table.default_rule().is_none() {
        bail!(
            "vat.default_code '{}' is not a declared VAT code",
            table.default_code
        );
    }
    Ok(table)
}

fn resolve_works_types(
    entries: &[WorksTypeEntry],
    settings: &SettingsSection,
) -> Result<WorksTypeTable> {
    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(entries.len());
    for entry in entries {
        let code = entry.code.trim();
        if code.is_empty() {
            bail!("works_types entries need a non-empty code");
        }
        if !seen.insert(code.to_string()) {
            bail!("works type '{code}' is declared twice");
        }
        rules.push(WorksTypeRule {
            code: code.to_string(),
            label: entry.label.clone(),
            patterns: entry
                .patterns
                .iter()
                .map(|pattern| pattern.trim().to_lowercase())
                .filter(|pattern| !pattern.is_empty())
                .collect(),
        });
    }
    Ok(WorksTypeTable {
        rules,
        fallback: settings.works_type_fallback.trim().to_string(),
    })
}

fn resolve_supplier(
    id: &str,
    entry: &SupplierEntry,
    settings: &ValidationSettings,
    vat: &VatTable,
    works_types: &WorksTypeTable,
) -> Result<SupplierDefinition> {
    if id.trim().is_empty() || id.trim() != id {
        bail!("supplier id must be non-empty without surrounding whitespace");
    }
    let required_fields = match &entry.required_fields {
        Some(fields) if fields.is_empty() => bail!("required_fields must be non-empty"),
        Some(fields) => fields.clone(),
        None => settings.baseline_required.clone(),
    };
    ensure_canonical(&required_fields, "required_fields")?;

    let canonical_keys: Vec<String> = entry.columns.keys().cloned().collect();
    ensure_canonical(&canonical_keys, "columns")?;
    if let Some((name, _)) = entry
        .columns
        .iter()
        .find(|(_, column)| column.trim().is_empty())
    {
        bail!("columns.{name} must name a non-empty column");
    }

    if let Some(code) = &entry.default_vat_code {
        if vat.get(code).is_none() {
            bail!("default_vat_code '{code}' is not a declared VAT code");
        }
    }
    if let Some(code) = &entry.default_works_type {
        let declared = works_types.rules.is_empty()
            || works_types.contains(code)
            || *code == works_types.fallback;
        if !declared {
            bail!("default_works_type '{code}' is not a declared works type");
        }
    }

    Ok(SupplierDefinition {
        id: id.to_string(),
        name: entry.name.clone().unwrap_or_else(|| id.to_string()),
        required_fields,
        columns: entry.columns.clone(),
        default_vat_code: entry.default_vat_code.clone(),
        default_works_type: entry.default_works_type.clone(),
        credit_note: entry.credit_note,
    })
}

fn resolve_extraction(
    entries: &[ExtractionEntry],
    suppliers: &BTreeMap<String, SupplierDefinition>,
) -> Result<TextExtractor> {
    let mut seen = HashSet::new();
    let mut profiles = Vec::with_capacity(entries.len());
    for entry in entries {
        let supplier = entry.supplier.as_str();
        if !suppliers.contains_key(supplier) {
            bail!("extraction profile for unknown supplier '{supplier}'");
        }
        if !seen.insert(supplier) {
            bail!("supplier '{supplier}' has more than one extraction profile");
        }
        if entry.marker.is_empty() {
            bail!("extraction profile for '{supplier}' needs a non-empty marker");
        }

        let mut patterns = Vec::with_capacity(entry.patterns.len());
        for (name, pattern) in &entry.patterns {
            if !field::ALL.contains(&name.as_str()) {
                bail!("extraction profile for '{supplier}': unknown field '{name}'");
            }
            let regex = Regex::new(pattern).with_context(|| {
                format!("extraction profile for '{supplier}': compile pattern for {name}")
            })?;
            if regex.captures_len() != 2 {
                bail!(
                    "extraction profile for '{supplier}': pattern for {name} must have exactly one capture group"
                );
            }
            patterns.push((name.clone(), regex));
        }
        profiles.push(ExtractionProfile {
            supplier_id: supplier.to_string(),
            marker: entry.marker.clone(),
            patterns,
        });
    }
    Ok(TextExtractor::new(profiles))
}

fn ensure_canonical(names: &[String], what: &str) -> Result<()> {
    match names.iter().find(|name| !field::ALL.contains(&name.as_str())) {
        Some(name) => Err(anyhow!(
            "{what}: unknown field '{name}' (expected one of {})",
            field::ALL.join(", ")
        )),
        None => Ok(()),
    }
}

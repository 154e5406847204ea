//! Pure classification of raw records into valid records or exceptions.
//!
//! The validator never edits a value. Each check either passes or yields the
//! detail for its reason code, and the first failing check in
//! `ValidationSettings::check_order` decides the reported reason. A check whose
//! input is owned by another check (e.g. the VAT comparison when `net` does
//! not parse) passes and leaves the failure to that owner.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::core::amount::{parse_amount, round_currency, vat_for, within_tolerance};
use crate::core::rules::{Check, RuleTable, SupplierDefinition, VatRule};
use crate::core::types::{
    NormalizedRecord, RawRecord, ReasonCode, RecordRef, ValidationOutcome, field,
};
use crate::core::works_type;

/// Fields a record cannot be valid without, whatever the supplier schema says.
const ESSENTIAL_FIELDS: [&str; 3] = [field::INVOICE_NUMBER, field::DATE, field::NET];

/// Classify one raw record against the rule table.
///
/// `supplier` is the definition looked up for `record.supplier_id()`; `None`
/// means the supplier is not configured, which is reported as
/// `UNKNOWN_SUPPLIER` unless a higher-priority check fails first.
pub fn validate(
    record: &RawRecord,
    supplier: Option<&SupplierDefinition>,
    rules: &RuleTable,
) -> ValidationOutcome {
    let fields = FieldView { record, supplier };
    let record_ref = RecordRef::from_raw(record, fields.get(field::INVOICE_NUMBER));

    for check in &rules.settings.check_order {
        if let Err(detail) = run_check(*check, &fields, rules) {
            return ValidationOutcome::exception(record_ref, check.reason(), detail);
        }
    }

    match normalize(&fields, rules) {
        Ok(normalized) => ValidationOutcome::Valid(normalized),
        Err((reason, detail)) => ValidationOutcome::exception(record_ref, reason, detail),
    }
}

/// Resolves canonical field names against a record: the supplier's column
/// mapping first, then the canonical name itself. Blank values count as absent.
struct FieldView<'a> {
    record: &'a RawRecord,
    supplier: Option<&'a SupplierDefinition>,
}

impl<'a> FieldView<'a> {
    fn get(&self, name: &str) -> Option<&'a str> {
        let mapped = self
            .supplier
            .and_then(|supplier| supplier.column_for(name))
            .and_then(|column| self.record.get(column));
        mapped
            .or_else(|| self.record.get(name))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// `None` when absent, otherwise the parse result.
    fn amount(&self, name: &str, precision: u32) -> Option<Result<Decimal, String>> {
        self.get(name)
            .map(|raw| parse_amount(raw, precision).map_err(|err| format!("{name}: {err}")))
    }

    fn parsed_amount(&self, name: &str, precision: u32) -> Option<Decimal> {
        self.amount(name, precision).and_then(Result::ok)
    }
}

fn run_check(check: Check, fields: &FieldView<'_>, rules: &RuleTable) -> Result<(), String> {
    match check {
        Check::MissingField => check_missing(fields, rules),
        Check::BadAmount => check_amounts(fields, rules),
        Check::BadDate => check_date(fields, rules),
        Check::VatMismatch => check_vat(fields, rules),
        Check::TotalMismatch => check_total(fields, rules),
        Check::UnknownWorksType => check_works_type(fields, rules),
        Check::UnknownSupplier => check_supplier(fields),
    }
}

fn check_missing(fields: &FieldView<'_>, rules: &RuleTable) -> Result<(), String> {
    let required = fields
        .supplier
        .map(|supplier| supplier.required_fields.as_slice())
        .unwrap_or(rules.settings.baseline_required.as_slice());

    let mut missing: Vec<&str> = Vec::new();
    for name in required.iter().map(String::as_str).chain(ESSENTIAL_FIELDS) {
        if fields.get(name).is_none() && !missing.contains(&name) {
            missing.push(name);
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("missing required field(s): {}", missing.join(", ")))
    }
}

fn check_amounts(fields: &FieldView<'_>, rules: &RuleTable) -> Result<(), String> {
    let precision = rules.settings.currency_precision;
    for name in [field::NET, field::VAT, field::TOTAL] {
        if let Some(Err(detail)) = fields.amount(name, precision) {
            return Err(detail);
        }
    }
    Ok(())
}

fn check_date(fields: &FieldView<'_>, rules: &RuleTable) -> Result<(), String> {
    match fields.get(field::DATE) {
        Some(raw) => parse_date(raw, &rules.settings.date_formats).map(|_| ()),
        None => Ok(()),
    }
}

fn check_vat(fields: &FieldView<'_>, rules: &RuleTable) -> Result<(), String> {
    let rule = resolve_vat(fields, rules)?;
    let precision = rules.settings.currency_precision;
    let (Some(net), Some(vat)) = (
        fields.parsed_amount(field::NET, precision),
        fields.parsed_amount(field::VAT, precision),
    ) else {
        return Ok(());
    };
    let Some(expected) = vat_for(net, rule.rate, precision) else {
        return Err(format!("vat at {}% on net {net} is out of range", rule.rate));
    };
    if within_tolerance(vat, expected, rules.settings.tolerance) {
        Ok(())
    } else {
        Err(format!(
            "vat {vat} does not match {expected} ({}% on net {net}, code {})",
            rule.rate, rule.code
        ))
    }
}

fn check_total(fields: &FieldView<'_>, rules: &RuleTable) -> Result<(), String> {
    let precision = rules.settings.currency_precision;
    let (Some(net), Some(total)) = (
        fields.parsed_amount(field::NET, precision),
        fields.parsed_amount(field::TOTAL, precision),
    ) else {
        return Ok(());
    };
    let vat = match fields.parsed_amount(field::VAT, precision) {
        Some(vat) => Some(vat),
        None => resolve_vat(fields, rules)
            .ok()
            .and_then(|rule| vat_for(net, rule.rate, precision)),
    };
    let Some(vat) = vat else {
        return Ok(());
    };
    let Some(expected) = net.checked_add(vat) else {
        return Err(format!("net {net} + vat {vat} is out of range"));
    };
    if within_tolerance(total, expected, rules.settings.tolerance) {
        Ok(())
    } else {
        Err(format!(
            "total {total} does not match net {net} + vat {vat} = {expected}"
        ))
    }
}

/// An explicit code must be a table code or the table fallback, which the
/// classifier itself emits.
fn check_works_type(fields: &FieldView<'_>, rules: &RuleTable) -> Result<(), String> {
    let table = &rules.works_types;
    match fields.get(field::WORKS_TYPE) {
        Some(code) if !table.rules.is_empty() && !table.contains(code) && code != table.fallback => {
            Err(format!("works type '{code}' is not configured"))
        }
        _ => Ok(()),
    }
}

fn check_supplier(fields: &FieldView<'_>) -> Result<(), String> {
    if fields.supplier.is_some() {
        return Ok(());
    }
    let id = fields.record.supplier_id();
    if id.trim().is_empty() {
        Err("record carries no supplier id".to_string())
    } else {
        Err(format!("supplier '{id}' is not configured"))
    }
}

/// VAT rule for the record: explicit code, else supplier default, else the
/// rule-set default when defaulting is allowed.
fn resolve_vat(fields: &FieldView<'_>, rules: &RuleTable) -> Result<VatRule, String> {
    let explicit = fields.get(field::VAT_CODE).map(str::to_string);
    let supplier_default = fields
        .supplier
        .and_then(|supplier| supplier.default_vat_code.clone());

    match explicit.or(supplier_default) {
        Some(code) => rules
            .vat
            .get(&code)
            .ok_or_else(|| format!("vat code '{code}' is not in the VAT rule set")),
        None => rules
            .vat
            .default_rule()
            .ok_or_else(|| "no vat code and the VAT rule set forbids a default".to_string()),
    }
}

fn parse_date(raw: &str, formats: &[String]) -> Result<NaiveDate, String> {
    formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .ok_or_else(|| format!("date '{raw}' is not a valid calendar date"))
}

type Rejection = (ReasonCode, String);

fn normalize(fields: &FieldView<'_>, rules: &RuleTable) -> Result<NormalizedRecord, Rejection> {
    let settings = &rules.settings;
    let precision = settings.currency_precision;
    let missing = |name: &str| (ReasonCode::MissingField, format!("missing required field(s): {name}"));

    let supplier = fields.supplier.ok_or_else(|| {
        (
            ReasonCode::UnknownSupplier,
            format!("supplier '{}' is not configured", fields.record.supplier_id()),
        )
    })?;
    let invoice_number = fields
        .get(field::INVOICE_NUMBER)
        .ok_or_else(|| missing(field::INVOICE_NUMBER))?;
    let date_raw = fields.get(field::DATE).ok_or_else(|| missing(field::DATE))?;
    let date = parse_date(date_raw, &settings.date_formats)
        .map_err(|detail| (ReasonCode::BadDate, detail))?;

    let bad_amount = |detail: String| (ReasonCode::BadAmount, detail);
    let out_of_range = |what: &str| (ReasonCode::BadAmount, format!("{what}: amount out of range"));
    let net = fields
        .amount(field::NET, precision)
        .ok_or_else(|| missing(field::NET))?
        .map_err(bad_amount)?;
    let rule = resolve_vat(fields, rules).map_err(|detail| (ReasonCode::VatMismatch, detail))?;
    let vat = match fields.amount(field::VAT, precision) {
        Some(parsed) => parsed.map_err(bad_amount)?,
        None => vat_for(net, rule.rate, precision).ok_or_else(|| out_of_range(field::VAT))?,
    };

    let works_type = match fields.get(field::WORKS_TYPE) {
        Some(code) => code.to_string(),
        None => works_type::classify(
            &rules.works_types,
            fields.get(field::DESCRIPTION),
            Some(supplier),
        ),
    };

    let sign = if supplier.credit_note {
        Decimal::NEGATIVE_ONE
    } else {
        Decimal::ONE
    };
    let net = round_currency(net * sign, precision);
    let vat = round_currency(vat * sign, precision);
    let total = net
        .checked_add(vat)
        .ok_or_else(|| out_of_range(field::TOTAL))?;

    Ok(NormalizedRecord {
        supplier_id: supplier.id.clone(),
        invoice_number: invoice_number.to_string(),
        date,
        net,
        vat,
        vat_code: rule.code,
        works_type,
        total,
        source: fields.record.source().clone(),
    })
}

//! API payload to database-row transformation.
//!
//! The upstream API is loosely typed: numeric codes arrive as numbers or
//! strings depending on the record, dates arrive as dates or datetimes, and
//! money fields mix numbers with string representations. Coercion here is
//! total; a field that cannot be coerced becomes `None` rather than failing
//! the record.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::client::{ApiArp, ApiArpItem, ItemQuery};
use crate::{Arp, ArpItem};

/// Coerce a JSON value to a trimmed non-empty string.
fn as_string(value: &Option<Value>) -> Option<String> {
    match value.as_ref()? {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerce a JSON value to an integer.
fn as_int(value: &Option<Value>) -> Option<i32> {
    match value.as_ref()? {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Coerce a JSON value to a decimal. Floats go through their string form to
/// avoid binary-float artifacts in money values.
fn as_decimal(value: &Option<Value>) -> Option<Decimal> {
    match value.as_ref()? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse an ISO date, tolerating a trailing time component.
fn as_date(value: &Option<String>) -> Option<NaiveDate> {
    let raw = value.as_deref()?.trim();
    let prefix = raw.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Parse an ISO datetime, tolerating fractional seconds and a date-only
/// value (midnight assumed).
fn as_datetime(value: &Option<String>) -> Option<NaiveDateTime> {
    let raw = value.as_deref()?.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| as_date(value)?.and_hms_opt(0, 0, 0))
}

/// Transform a raw API header record into a database row.
///
/// Returns `None` when the record lacks its natural key (the PNCP control
/// number); such records cannot be upserted idempotently.
pub fn transform_arp(raw: &ApiArp) -> Option<Arp> {
    let control_code = raw.control_code.as_deref()?.trim().to_string();
    if control_code.is_empty() {
        return None;
    }

    let purchase_number = as_string(&raw.purchase_number).unwrap_or_default();
    let managing_unit = as_string(&raw.managing_unit).unwrap_or_default();

    Some(Arp {
        id: Arp::derive_id(&control_code),
        control_code,
        arp_number: raw.arp_number.clone(),
        purchase_number,
        purchase_year: as_int(&raw.purchase_year),
        managing_unit,
        valid_from: as_date(&raw.valid_from),
        valid_until: as_date(&raw.valid_until),
        signed_at: as_date(&raw.signed_at),
        source_updated_at: as_datetime(&raw.source_updated_at),
        object: raw.object.clone(),
        total_value: as_decimal(&raw.total_value),
        item_count: as_int(&raw.item_count),
        status: raw.status.clone(),
        modality_code: as_string(&raw.modality_code),
        modality_name: raw.modality_name.clone(),
        pncp_ata_link: raw.pncp_ata_link.clone(),
        pncp_purchase_link: raw.pncp_purchase_link.clone(),
        deleted: raw.deleted.unwrap_or(false),
    })
}

/// Transform a raw API line item into a database row under `arp_id`.
pub fn transform_item(raw: &ApiArpItem, arp_id: &str) -> ArpItem {
    let item_number = as_int(&raw.item_number);
    let item_code = as_string(&raw.item_code);

    ArpItem {
        id: ArpItem::derive_id(arp_id, item_number, item_code.as_deref()),
        arp_id: arp_id.to_string(),
        item_number,
        item_code,
        description: raw.description.clone(),
        item_type: raw.item_type.clone(),
        unit_value: as_decimal(&raw.unit_value),
        total_value: as_decimal(&raw.total_value),
        quantity: as_decimal(&raw.quantity),
        unit: raw.unit.clone(),
        brand: raw.brand.clone(),
        model: raw.model.clone(),
        supplier_tax_id: as_string(&raw.supplier_tax_id),
        supplier_name: raw.supplier_name.clone(),
        committed_quantity: as_decimal(&raw.committed_quantity),
        max_adhesion: as_decimal(&raw.max_adhesion),
        deleted: raw.deleted.unwrap_or(false),
    }
}

/// Build the item-endpoint query for a transformed header row.
///
/// Returns `None` when the row is missing a field the endpoint requires.
pub fn item_query_for(arp: &Arp) -> Option<ItemQuery> {
    if arp.purchase_number.is_empty() || arp.managing_unit.is_empty() {
        return None;
    }
    Some(ItemQuery {
        arp_id: arp.id.clone(),
        purchase_number: arp.purchase_number.clone(),
        managing_unit: arp.managing_unit.clone(),
        valid_from: arp.valid_from?,
    })
}

//! Feature normalization from raw caller fields.
//!
//! Two deliberately different paths share one schema:
//!
//! - [`FeatureNormalizer::normalize_one`] is strict. The first missing,
//!   non-numeric or unknown field fails the record.
//! - [`FeatureNormalizer::normalize_many`] is tolerant. Bad or absent cells
//!   are replaced with per-column defaults so one malformed cell never
//!   discards a batch.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PredictorError, PredictorResult, ValidationError};
use crate::schema::{names_match, FeatureKind, FeatureSchema, FeatureSlot};
use crate::types::{FeatureTable, FeatureVector, RawRecord, RawTable};

/// Converts raw field mappings into model-ready feature vectors.
#[derive(Debug, Clone)]
pub struct FeatureNormalizer {
    schema: Arc<FeatureSchema>,
}

impl FeatureNormalizer {
    pub fn new(schema: Arc<FeatureSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Normalize one record, failing on the first invalid field.
    ///
    /// Numeric fields are checked before categorical ones, each group in
    /// slot order.
    pub fn normalize_one(&self, raw: &RawRecord) -> Result<FeatureVector, ValidationError> {
        let slots = self.schema.slots();
        let mut mapped: HashMap<&str, f64> = HashMap::with_capacity(slots.len());

        for slot in slots.iter().filter(|s| s.is_numeric()) {
            let (field, value) = lookup(raw, slot).ok_or_else(|| ValidationError::MissingField {
                field: slot.name.clone(),
            })?;
            let number = parse_number(value).ok_or_else(|| ValidationError::NotNumeric {
                field: field.to_string(),
                value: value.to_string(),
            })?;
            mapped.insert(slot.name.as_str(), number);
        }

        for slot in slots.iter().filter(|s| !s.is_numeric()) {
            let (field, value) = lookup(raw, slot).ok_or_else(|| ValidationError::MissingField {
                field: slot.name.clone(),
            })?;
            let codec = self
                .schema
                .codec(&slot.name)
                .or_else(|| self.schema.codec(field))
                .ok_or_else(|| ValidationError::NoCodec {
                    field: field.to_string(),
                })?;
            let code = value
                .as_str()
                .and_then(|label| codec.encode(label))
                .ok_or_else(|| ValidationError::UnknownLabel {
                    field: field.to_string(),
                    value: value.to_string(),
                    allowed: codec.accepted_labels(),
                })?;
            mapped.insert(slot.name.as_str(), f64::from(code));
        }

        let missing: Vec<String> = slots
            .iter()
            .filter(|s| !mapped.contains_key(s.name.as_str()))
            .map(|s| s.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFeatures { features: missing });
        }

        let values: Vec<f64> = slots.iter().map(|s| mapped[s.name.as_str()]).collect();

        let undefined: Vec<String> = slots
            .iter()
            .zip(&values)
            .filter(|(_, v)| !v.is_finite())
            .map(|(s, _)| s.name.clone())
            .collect();
        if !undefined.is_empty() {
            return Err(ValidationError::UndefinedValues {
                features: undefined,
            });
        }

        debug!(features = values.len(), "Record normalized");
        Ok(FeatureVector::new(values))
    }

    /// Normalize a whole table, substituting defaults for bad cells.
    ///
    /// Fails only when a slot has no substitution path at all (a categorical
    /// slot whose codec has no labels).
    pub fn normalize_many(&self, table: &RawTable) -> PredictorResult<FeatureTable> {
        let slots = self.schema.slots();

        for slot in slots {
            if let FeatureKind::Categorical(codec) = &slot.kind {
                if codec.is_empty() {
                    return Err(PredictorError::StructuralFeature {
                        feature: slot.name.clone(),
                        reason: "category codec has no labels to default to".to_string(),
                    });
                }
            }
        }

        info!(
            rows = table.len(),
            columns = table.columns().len(),
            "Normalizing batch input"
        );

        let absent: Vec<&str> = slots
            .iter()
            .filter(|slot| {
                !table
                    .columns()
                    .iter()
                    .any(|c| slot.accepted_names().any(|n| names_match(c, n)))
            })
            .map(|slot| slot.name.as_str())
            .collect();
        if !absent.is_empty() {
            warn!(missing = ?absent, "Batch is missing required columns, defaults will be used");
        }

        let mut out = FeatureTable::with_capacity(slots.len(), table.len());
        let mut substituted = vec![0usize; slots.len()];
        let mut row_buf = vec![0.0; slots.len()];

        for row in table.rows() {
            for (i, slot) in slots.iter().enumerate() {
                let cell = lookup(row, slot).map(|(_, v)| v);
                row_buf[i] = match &slot.kind {
                    FeatureKind::Numeric { batch_default } => {
                        match cell.and_then(parse_number).filter(|v| v.is_finite()) {
                            Some(v) => v,
                            None => {
                                substituted[i] += 1;
                                batch_default.unwrap_or(f64::NAN)
                            }
                        }
                    }
                    FeatureKind::Categorical(codec) => {
                        match cell.and_then(Value::as_str).and_then(|l| codec.encode(l)) {
                            Some(code) => f64::from(code),
                            None => {
                                substituted[i] += 1;
                                f64::from(codec.default_code().unwrap_or(0))
                            }
                        }
                    }
                };
            }
            out.push_row(&row_buf);
        }

        for (i, slot) in slots.iter().enumerate() {
            if let FeatureKind::Numeric {
                batch_default: None,
            } = slot.kind
            {
                let fill = column_median(&out.column(i)).unwrap_or(0.0);
                for v in out.column_mut(i).filter(|v| v.is_nan()) {
                    *v = fill;
                }
            }
            if substituted[i] > 0 {
                warn!(
                    field = %slot.name,
                    substituted = substituted[i],
                    default = %describe_default(slot),
                    "Replaced missing or invalid batch values"
                );
            }
        }

        let mut residual = 0usize;
        for i in 0..slots.len() {
            for v in out.column_mut(i).filter(|v| !v.is_finite()) {
                *v = 0.0;
                residual += 1;
            }
        }
        if residual > 0 {
            warn!(cells = residual, "Residual undefined values filled with 0");
        }

        info!(
            rows = out.n_rows(),
            features = out.n_features(),
            "Batch input normalized"
        );
        Ok(out)
    }
}

/// First non-null value among the slot's accepted names, canonical first.
fn lookup<'a>(row: &'a RawRecord, slot: &FeatureSlot) -> Option<(&'a str, &'a Value)> {
    slot.accepted_names().find_map(|name| {
        row.iter()
            .find(|(key, value)| !value.is_null() && names_match(key, name))
            .map(|(key, value)| (key.as_str(), value))
    })
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn column_median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(f64::total_cmp);
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some((finite[mid - 1] + finite[mid]) / 2.0)
    } else {
        Some(finite[mid])
    }
}

fn describe_default(slot: &FeatureSlot) -> String {
    match &slot.kind {
        FeatureKind::Numeric {
            batch_default: Some(v),
        } => v.to_string(),
        FeatureKind::Numeric {
            batch_default: None,
        } => "column median".to_string(),
        FeatureKind::Categorical(codec) => codec.default_label().unwrap_or("").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CategoryCodec, FEATURE_COUNT};
    use proptest::prelude::*;
    use serde_json::json;

    fn normalizer() -> FeatureNormalizer {
        FeatureNormalizer::new(Arc::new(FeatureSchema::hapi()))
    }

    fn baseline_record() -> RawRecord {
        let value = json!({
            "住院第几天": 5,
            "白细胞计数": 9.0,
            "血钾浓度": "4.1",
            "白蛋白计数": 38,
            "吸烟史": "无",
            "摩擦力/剪切力": "无",
            "移动能力": "不受限",
            "感知觉": "不受限",
            "身体活动度": "走",
            "日常食物获取": "充足",
            "水肿": "无",
            "皮肤潮湿": "无",
            "意识障碍": "无",
            "高血压": "无",
            "糖尿病": "无",
            "冠心病": "无",
            "下肢深静脉血栓": "无",
            "年龄": 72
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_single_record_in_slot_order() {
        let vector = normalizer().normalize_one(&baseline_record()).unwrap();
        assert_eq!(vector.len(), FEATURE_COUNT);
        let v = vector.as_slice();
        assert_eq!(v[0], 5.0);
        assert!(v[1..14].iter().all(|&c| c == 0.0));
        assert_eq!(v[14], 9.0);
        assert_eq!(v[15], 4.1);
        assert_eq!(v[16], 38.0);
    }

    #[test]
    fn test_canonical_english_names() {
        let mut raw = RawRecord::new();
        for slot in FeatureSchema::hapi().slots() {
            let value = match &slot.kind {
                FeatureKind::Numeric { .. } => json!(1.5),
                FeatureKind::Categorical(codec) => json!(codec.labels().last().unwrap()),
            };
            raw.insert(slot.name.clone(), value);
        }
        let v = normalizer().normalize_one(&raw).unwrap();
        assert_eq!(v.as_slice()[7], 2.0); // physical_activity = bedfast
        assert_eq!(v.as_slice()[8], 2.0); // friction_shear = present
        assert_eq!(v.as_slice()[1], 1.0);
    }

    #[test]
    fn test_missing_numeric_field() {
        let mut raw = baseline_record();
        raw.remove("白细胞计数");
        let err = normalizer().normalize_one(&raw).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                field: "white_cell_count".to_string()
            }
        );
    }

    #[test]
    fn test_null_counts_as_missing() {
        let mut raw = baseline_record();
        raw.insert("水肿".to_string(), Value::Null);
        let err = normalizer().normalize_one(&raw).unwrap_err();
        assert_eq!(err.fields(), vec!["edema"]);
    }

    #[test]
    fn test_non_numeric_value() {
        let mut raw = baseline_record();
        raw.insert("白蛋白计数".to_string(), json!("high"));
        match normalizer().normalize_one(&raw).unwrap_err() {
            ValidationError::NotNumeric { field, value } => {
                assert_eq!(field, "白蛋白计数");
                assert_eq!(value, "\"high\"");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_label_lists_domain() {
        let mut raw = baseline_record();
        raw.insert("身体活动度".to_string(), json!("running"));
        match normalizer().normalize_one(&raw).unwrap_err() {
            ValidationError::UnknownLabel { field, allowed, .. } => {
                assert_eq!(field, "身体活动度");
                assert_eq!(allowed, vec!["walking", "走", "sitting", "坐", "bedfast", "卧"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_numeric_code_is_not_a_label() {
        let mut raw = baseline_record();
        raw.insert("高血压".to_string(), json!(1));
        let err = normalizer().normalize_one(&raw).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownLabel { .. }));
    }

    #[test]
    fn test_nan_string_is_undefined() {
        let mut raw = baseline_record();
        raw.insert("血钾浓度".to_string(), json!("NaN"));
        let err = normalizer().normalize_one(&raw).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UndefinedValues {
                features: vec!["serum_potassium".to_string()]
            }
        );
    }

    fn batch(rows: Vec<Value>) -> RawTable {
        serde_json::from_value(Value::Array(rows)).unwrap()
    }

    #[test]
    fn test_batch_defaults_for_missing_cells() {
        let mut full = baseline_record();
        full.insert("身体活动度".to_string(), json!("坐"));
        let mut partial = baseline_record();
        partial.remove("白细胞计数");
        partial.insert("水肿".to_string(), json!("unknown"));
        partial.insert("住院第几天".to_string(), json!("n/a"));

        let table = batch(vec![Value::Object(full), Value::Object(partial)]);
        let out = normalizer().normalize_many(&table).unwrap();

        assert_eq!(out.n_rows(), 2);
        assert_eq!(out.row(0)[7], 1.0);
        assert_eq!(out.row(0)[14], 9.0);
        assert_eq!(out.row(1)[14], 7.0);
        assert_eq!(out.row(1)[3], 0.0);
        assert_eq!(out.row(1)[0], 7.0);
    }

    #[test]
    fn test_batch_with_no_known_columns() {
        let table = batch(vec![json!({"patient_id": "P1"})]);
        let out = normalizer().normalize_many(&table).unwrap();
        assert_eq!(
            out.row(0),
            &[7.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 7.0, 4.0, 40.0]
        );
    }

    #[test]
    fn test_empty_batch() {
        let out = normalizer().normalize_many(&RawTable::default()).unwrap();
        assert_eq!(out.n_rows(), 0);
        assert_eq!(out.n_features(), FEATURE_COUNT);
    }

    #[test]
    fn test_median_fill_without_default() {
        let schema = FeatureSchema::builder()
            .numeric("x", None, &[])
            .numeric("y", None, &[])
            .build();
        let n = FeatureNormalizer::new(Arc::new(schema));
        let table = batch(vec![
            json!({"x": 1.0}),
            json!({"x": 3.0}),
            json!({"x": "bad"}),
            json!({"x": 10.0}),
        ]);
        let out = n.normalize_many(&table).unwrap();
        assert_eq!(out.column(0), vec![1.0, 3.0, 3.0, 10.0]);
        assert_eq!(out.column(1), vec![0.0; 4]);
    }

    #[test]
    fn test_empty_codec_is_structural_failure() {
        let schema = FeatureSchema::builder()
            .categorical("broken", CategoryCodec::new(&[]), &[])
            .build();
        let n = FeatureNormalizer::new(Arc::new(schema));
        let err = n.normalize_many(&batch(vec![json!({})])).unwrap_err();
        assert!(matches!(err, PredictorError::StructuralFeature { ref feature, .. } if feature == "broken"));
    }

    #[test]
    fn test_canonical_name_wins_over_alias() {
        let table = batch(vec![json!({"白细胞": 5.0, "white_cell_count": 8.0})]);
        let out = normalizer().normalize_many(&table).unwrap();
        assert_eq!(out.row(0)[14], 8.0);
    }

    fn cell() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<f64>().prop_map(|f| json!(f)),
            ".{0,8}".prop_map(Value::String),
            Just(json!("有")),
            Just(json!([1, 2])),
        ]
    }

    proptest! {
        #[test]
        fn batch_normalization_never_fails_on_cells(
            cells in proptest::collection::vec(cell(), FEATURE_COUNT)
        ) {
            let schema = FeatureSchema::hapi();
            let row: RawRecord = schema
                .slots()
                .iter()
                .zip(cells)
                .map(|(slot, v)| (slot.name.clone(), v))
                .collect();
            let out = normalizer().normalize_many(&RawTable::from_records(vec![row])).unwrap();
            prop_assert_eq!(out.n_rows(), 1);
            prop_assert!(out.row(0).iter().all(|v| v.is_finite()));
        }
    }
}

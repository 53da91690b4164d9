//! Feature schema: slot order, field aliases and categorical codecs.
//!
//! The slot order matches the column order the HAPI classifiers were fit on.
//! Every input path resolves to exactly these slots before a model is called.

use std::collections::HashMap;
use std::fmt;

/// Number of slots in the HAPI feature vector.
pub const FEATURE_COUNT: usize = 17;

/// Closed label set of one categorical feature.
///
/// Codes are assigned by position; the first label is the baseline used
/// when the batch path has to substitute an unknown value.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryCodec {
    labels: Vec<CodecLabel>,
}

#[derive(Debug, Clone, PartialEq)]
struct CodecLabel {
    label: String,
    synonyms: Vec<String>,
}

impl CategoryCodec {
    /// Build a codec from `(label, synonyms)` pairs in code order.
    pub fn new(labels: &[(&str, &[&str])]) -> Self {
        Self {
            labels: labels
                .iter()
                .map(|(label, synonyms)| CodecLabel {
                    label: (*label).to_string(),
                    synonyms: synonyms.iter().map(|s| (*s).to_string()).collect(),
                })
                .collect(),
        }
    }

    fn absent_present() -> Self {
        Self::new(&[("none", &["无"]), ("present", &["有"])])
    }

    /// Code for a label or one of its synonyms.
    pub fn encode(&self, raw: &str) -> Option<u32> {
        let wanted = raw.trim();
        self.labels
            .iter()
            .position(|l| {
                l.label.eq_ignore_ascii_case(wanted) || l.synonyms.iter().any(|s| s == wanted)
            })
            .map(|idx| idx as u32)
    }

    /// Primary labels in code order.
    pub fn labels(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.label.clone()).collect()
    }

    /// Every accepted spelling: each label followed by its synonyms.
    pub fn accepted_labels(&self) -> Vec<String> {
        self.labels
            .iter()
            .flat_map(|l| std::iter::once(&l.label).chain(&l.synonyms))
            .cloned()
            .collect()
    }

    pub fn default_label(&self) -> Option<&str> {
        self.labels.first().map(|l| l.label.as_str())
    }

    pub fn default_code(&self) -> Option<u32> {
        self.default_label().map(|_| 0)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// What kind of value a slot holds.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureKind {
    /// Floating point input. `batch_default` fills missing batch cells;
    /// without one the batch path falls back to the column median.
    Numeric { batch_default: Option<f64> },
    /// Label input encoded through a codec.
    Categorical(CategoryCodec),
}

/// One named position in the feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSlot {
    pub name: String,
    pub kind: FeatureKind,
    pub aliases: Vec<String>,
}

impl FeatureSlot {
    pub fn is_numeric(&self) -> bool {
        matches!(self.kind, FeatureKind::Numeric { .. })
    }

    /// Canonical name first, then aliases.
    pub fn accepted_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Ordered feature slots plus the alias index over them.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    slots: Vec<FeatureSlot>,
    index: HashMap<String, usize>,
}

fn alias_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Field-name equality used for alias matching.
pub(crate) fn names_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

impl FeatureSchema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// The schema the HAPI classifiers were trained with.
    pub fn hapi() -> Self {
        let yes_no = CategoryCodec::absent_present;
        Self::builder()
            .numeric(
                "hospital_days",
                Some(7.0),
                &["住院第几天", "住院时长", "住院天数", "hospitalization_day"],
            )
            .categorical("smoking_history", yes_no(), &["吸烟史", "吸烟"])
            .categorical(
                "daily_food_intake",
                CategoryCodec::new(&[("adequate", &["充足"]), ("inadequate", &["缺乏"])]),
                &["日常食物获取", "日常食物获取量", "饮食"],
            )
            .categorical("edema", yes_no(), &["水肿"])
            .categorical("skin_moisture", yes_no(), &["皮肤潮湿", "皮肤"])
            .categorical(
                "mobility",
                CategoryCodec::new(&[("unrestricted", &["不受限"]), ("restricted", &["受限"])]),
                &["移动能力", "移动"],
            )
            .categorical(
                "sensory_perception",
                CategoryCodec::new(&[("unrestricted", &["不受限"]), ("restricted", &["受限"])]),
                &["感知觉", "感知"],
            )
            .categorical(
                "physical_activity",
                CategoryCodec::new(&[
                    ("walking", &["走"]),
                    ("sitting", &["坐"]),
                    ("bedfast", &["卧"]),
                ]),
                &["身体活动度", "活动"],
            )
            .categorical(
                "friction_shear",
                CategoryCodec::new(&[
                    ("none", &["无"]),
                    ("potential", &["潜在"]),
                    ("present", &["有"]),
                ]),
                &["摩擦力/剪切力", "摩擦力"],
            )
            .categorical("consciousness_disorder", yes_no(), &["意识障碍", "意识"])
            .categorical("hypertension", yes_no(), &["高血压"])
            .categorical("diabetes", yes_no(), &["糖尿病"])
            .categorical("coronary_heart_disease", yes_no(), &["冠心病"])
            .categorical("lower_limb_dvt", yes_no(), &["下肢深静脉血栓", "血栓"])
            .numeric("white_cell_count", Some(7.0), &["白细胞计数", "白细胞", "wbc"])
            .numeric("serum_potassium", Some(4.0), &["血钾浓度", "血钾"])
            .numeric("albumin", Some(40.0), &["白蛋白计数", "白蛋白"])
            .build()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[FeatureSlot] {
        &self.slots
    }

    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.name.as_str()).collect()
    }

    /// Slot position for a canonical or alias name.
    pub fn index_of(&self, raw_name: &str) -> Option<usize> {
        self.index.get(&alias_key(raw_name)).copied()
    }

    /// Canonical name for a canonical or alias name.
    pub fn resolve(&self, raw_name: &str) -> Option<&str> {
        self.index_of(raw_name).map(|i| self.slots[i].name.as_str())
    }

    /// Codec keyed by the exact canonical slot name.
    pub fn codec(&self, name: &str) -> Option<&CategoryCodec> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| match &s.kind {
                FeatureKind::Categorical(codec) => Some(codec),
                FeatureKind::Numeric { .. } => None,
            })
    }
}

impl fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names().join(", "))
    }
}

/// Incremental construction of a [`FeatureSchema`].
///
/// A name already claimed by an earlier slot keeps pointing at that slot.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    slots: Vec<FeatureSlot>,
}

impl SchemaBuilder {
    pub fn numeric(mut self, name: &str, batch_default: Option<f64>, aliases: &[&str]) -> Self {
        self.slots.push(FeatureSlot {
            name: name.to_string(),
            kind: FeatureKind::Numeric { batch_default },
            aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
        });
        self
    }

    pub fn categorical(mut self, name: &str, codec: CategoryCodec, aliases: &[&str]) -> Self {
        self.slots.push(FeatureSlot {
            name: name.to_string(),
            kind: FeatureKind::Categorical(codec),
            aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> FeatureSchema {
        let mut index = HashMap::new();
        for (i, slot) in self.slots.iter().enumerate() {
            for name in slot.accepted_names() {
                index.entry(alias_key(name)).or_insert(i);
            }
        }
        FeatureSchema {
            slots: self.slots,
            index,
        }
    }
}

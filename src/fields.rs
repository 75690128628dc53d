use std::collections::BTreeMap;

/// Free-form value parsed out of YAML frontmatter.
///
/// Used as the representation for both per-note and per-vault `metadata`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<FieldValue>),
    Object(BTreeMap<String, FieldValue>),
}

pub type FieldMap = BTreeMap<String, FieldValue>;

pub fn normalize_field_key(key: &str) -> Option<String> {
    let k = key.trim();
    if k.is_empty() {
        return None;
    }
    Some(k.to_lowercase())
}

pub fn merge_field(map: &mut FieldMap, key: String, value: FieldValue) {
    let Some(existing) = map.get_mut(&key) else {
        map.insert(key, value);
        return;
    };

    match existing {
        FieldValue::List(items) => items.push(value),
        _ => {
            let old = std::mem::replace(existing, FieldValue::Null);
            *existing = FieldValue::List(vec![old, value]);
        }
    }
}

pub fn yaml_to_field_value(v: &serde_yaml::Value) -> FieldValue {
    match v {
        serde_yaml::Value::Null => FieldValue::Null,
        serde_yaml::Value::Bool(b) => FieldValue::Bool(*b),
        serde_yaml::Value::Number(n) => FieldValue::Number(n.as_f64().unwrap_or(0.0)),
        serde_yaml::Value::String(s) => FieldValue::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => {
            FieldValue::List(seq.iter().map(yaml_to_field_value).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                let Some(k) = k.as_str().and_then(normalize_field_key) else {
                    continue;
                };
                out.insert(k, yaml_to_field_value(v));
            }
            FieldValue::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_field_value(&tagged.value),
    }
}

/// Flatten a parsed frontmatter mapping into a [`FieldMap`]. Non-mapping
/// frontmatter (a bare scalar or sequence at the top level) yields an empty map.
pub fn extract_top_level_frontmatter_fields(fm: &serde_yaml::Value) -> FieldMap {
    let mut out = FieldMap::new();
    let Some(map) = fm.as_mapping() else {
        return out;
    };

    for (k, v) in map {
        let Some(key) = k.as_str().and_then(normalize_field_key) else {
            continue;
        };
        merge_field(&mut out, key, yaml_to_field_value(v));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_field_collapses_repeats_into_list() {
        let mut map = FieldMap::new();
        merge_field(&mut map, "status".into(), FieldValue::String("draft".into()));
        merge_field(&mut map, "status".into(), FieldValue::String("final".into()));
        assert_eq!(
            map.get("status"),
            Some(&FieldValue::List(vec![
                FieldValue::String("draft".into()),
                FieldValue::String("final".into()),
            ]))
        );
    }

    #[test]
    fn extract_top_level_frontmatter_fields_flattens_mapping() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str("title: Hello\ncount: 3\ntags: [a, b]\n").unwrap();
        let fields = extract_top_level_frontmatter_fields(&yaml);
        assert_eq!(fields.get("title"), Some(&FieldValue::String("Hello".into())));
        assert_eq!(fields.get("count"), Some(&FieldValue::Number(3.0)));
        assert_eq!(
            fields.get("tags"),
            Some(&FieldValue::List(vec![
                FieldValue::String("a".into()),
                FieldValue::String("b".into()),
            ]))
        );
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ID_FIELD: &str = "id";
pub const NAME_FIELD: &str = "name";
pub const SPECIES_FIELD: &str = "species";
pub const DIET_FIELD: &str = "diet";
pub const TRAITS_FIELD: &str = "personalityTraits";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum KernelError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// One animal entry in the collection.
///
/// Fields beyond the four validated ones are carried in `extra` and written back
/// verbatim on every persist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Animal {
    pub id: String,
    pub name: String,
    pub species: String,
    pub diet: String,
    #[serde(rename = "personalityTraits")]
    pub personality_traits: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Animal {
    /// Build a typed record from a candidate object, assigning `id`.
    ///
    /// Any `id` carried by the candidate is replaced.
    ///
    /// # Errors
    /// Returns [`KernelError::Validation`] when the candidate fails [`check_candidate`]
    /// or a personality trait is not a string.
    pub fn from_candidate(
        id: impl Into<String>,
        mut candidate: Map<String, Value>,
    ) -> Result<Self, KernelError> {
        check_candidate(&candidate)?;

        let name = take_string(&mut candidate, NAME_FIELD)?;
        let species = take_string(&mut candidate, SPECIES_FIELD)?;
        let diet = take_string(&mut candidate, DIET_FIELD)?;
        let personality_traits = match candidate.shift_remove(TRAITS_FIELD) {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(value) => Ok(value),
                    other => Err(KernelError::Validation(format!(
                        "{TRAITS_FIELD} entries MUST be strings, found {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(KernelError::Validation(format!("{TRAITS_FIELD} MUST be an array")))
            }
        };
        candidate.shift_remove(ID_FIELD);

        Ok(Self { id: id.into(), name, species, diet, personality_traits, extra: candidate })
    }

    /// True when every trait in `traits` appears in this record's traits.
    #[must_use]
    pub fn has_all_traits(&self, traits: &[String]) -> bool {
        traits.iter().all(|wanted| self.personality_traits.iter().any(|have| have == wanted))
    }

    /// Re-run the structural checks against an already-typed record.
    ///
    /// Records loaded from an edited backing document can carry empty strings that
    /// the candidate path would have rejected.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.name.is_empty() && !self.species.is_empty() && !self.diet.is_empty()
    }
}

fn take_string(candidate: &mut Map<String, Value>, field: &str) -> Result<String, KernelError> {
    match candidate.shift_remove(field) {
        Some(Value::String(value)) => Ok(value),
        _ => Err(KernelError::Validation(format!("{field} MUST be a non-empty string"))),
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CriterionKey {
    PersonalityTraits,
    Diet,
    Species,
    Name,
}

impl CriterionKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PersonalityTraits => TRAITS_FIELD,
            Self::Diet => DIET_FIELD,
            Self::Species => SPECIES_FIELD,
            Self::Name => NAME_FIELD,
        }
    }

    /// Map a query-string key onto a recognized criterion.
    ///
    /// `personalityTraits[]` is accepted as the bracketed array form browsers and form
    /// libraries emit.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "personalityTraits" | "personalityTraits[]" => Some(Self::PersonalityTraits),
            "diet" => Some(Self::Diet),
            "species" => Some(Self::Species),
            "name" => Some(Self::Name),
            _ => None,
        }
    }
}

/// Typed filter with exactly the four recognized keys; every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct AnimalCriteria {
    #[serde(rename = "personalityTraits", default, skip_serializing_if = "Vec::is_empty")]
    pub personality_traits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ParsedCriteria {
    pub criteria: AnimalCriteria,
    pub ignored_keys: Vec<String>,
}

impl AnimalCriteria {
    /// Build criteria from decoded query-string pairs.
    ///
    /// Traits accumulate across repeated keys; a repeated scalar key keeps its last
    /// value. Empty values never filter. Unrecognized keys are returned in
    /// [`ParsedCriteria::ignored_keys`], each at most once.
    #[must_use]
    pub fn from_query_pairs<I, K, V>(pairs: I) -> ParsedCriteria
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut parsed = ParsedCriteria::default();
        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            let Some(criterion) = CriterionKey::parse(&key) else {
                if !parsed.ignored_keys.contains(&key) {
                    parsed.ignored_keys.push(key);
                }
                continue;
            };
            if value.is_empty() {
                continue;
            }

            let criteria = &mut parsed.criteria;
            match criterion {
                CriterionKey::PersonalityTraits => criteria.personality_traits.push(value),
                CriterionKey::Diet => criteria.diet = Some(value),
                CriterionKey::Species => criteria.species = Some(value),
                CriterionKey::Name => criteria.name = Some(value),
            }
        }
        parsed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.personality_traits.is_empty()
            && self.diet.is_none()
            && self.species.is_none()
            && self.name.is_none()
    }

    /// True when `animal` passes every active filter.
    #[must_use]
    pub fn matches(&self, animal: &Animal) -> bool {
        animal.has_all_traits(&self.personality_traits)
            && equals_if_set(self.diet.as_deref(), &animal.diet)
            && equals_if_set(self.species.as_deref(), &animal.species)
            && equals_if_set(self.name.as_deref(), &animal.name)
    }
}

/// Build a candidate object from decoded form fields.
///
/// Trait keys (plain or bracketed) always collect into an array, even when a single
/// value is sent. Any other repeated key keeps its last value.
#[must_use]
pub fn candidate_from_form_pairs<I, K, V>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut candidate = Map::new();
    let mut traits = None::<Vec<Value>>;
    for (key, value) in pairs {
        let key = key.into();
        let value = value.into();
        if CriterionKey::parse(&key) == Some(CriterionKey::PersonalityTraits) {
            traits.get_or_insert_with(Vec::new).push(Value::String(value));
        } else {
            candidate.insert(key, Value::String(value));
        }
    }
    if let Some(traits) = traits {
        candidate.insert(TRAITS_FIELD.to_string(), Value::Array(traits));
    }
    candidate
}

fn equals_if_set(wanted: Option<&str>, actual: &str) -> bool {
    match wanted {
        Some(wanted) => wanted == actual,
        None => true,
    }
}

/// Return the records that pass every active filter in `criteria`, in input order.
#[must_use]
pub fn filter_by_criteria(criteria: &AnimalCriteria, records: &[Animal]) -> Vec<Animal> {
    if criteria.is_empty() {
        return records.to_vec();
    }

    records.iter().filter(|animal| criteria.matches(animal)).cloned().collect()
}

/// First record whose `id` equals `id`, in insertion order.
#[must_use]
pub fn find_by_id<'a>(id: &str, records: &'a [Animal]) -> Option<&'a Animal> {
    records.iter().find(|animal| animal.id == id)
}

/// Structural check of a candidate record, independent of any store state.
#[must_use]
pub fn validate(candidate: &Map<String, Value>) -> bool {
    check_candidate(candidate).is_ok()
}

/// Like [`validate`], but names the first field that failed.
///
/// An empty `personalityTraits` array passes.
///
/// # Errors
/// Returns [`KernelError::Validation`] for the first missing, mistyped, or empty field.
pub fn check_candidate(candidate: &Map<String, Value>) -> Result<(), KernelError> {
    for field in [NAME_FIELD, SPECIES_FIELD, DIET_FIELD] {
        match candidate.get(field) {
            Some(Value::String(value)) if !value.is_empty() => {}
            _ => {
                return Err(KernelError::Validation(format!(
                    "{field} MUST be a non-empty string"
                )));
            }
        }
    }

    if !matches!(candidate.get(TRAITS_FIELD), Some(Value::Array(_))) {
        return Err(KernelError::Validation(format!("{TRAITS_FIELD} MUST be an array")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    const TRAIT_POOL: [&str; 5] = ["Loyal", "Bold", "Shy", "Hungry", "Sleepy"];
    const DIET_POOL: [&str; 3] = ["herbivore", "carnivore", "omnivore"];

    fn mk_animal(id: &str, name: &str, species: &str, diet: &str, traits: &[&str]) -> Animal {
        Animal {
            id: id.to_string(),
            name: name.to_string(),
            species: species.to_string(),
            diet: diet.to_string(),
            personality_traits: traits.iter().map(ToString::to_string).collect(),
            extra: Map::new(),
        }
    }

    fn fixture_records() -> Vec<Animal> {
        vec![
            mk_animal("0", "Furry", "cat", "herbivore", &["Loyal"]),
            mk_animal("1", "Rex", "dog", "omnivore", &["Bold", "Loyal"]),
            mk_animal("2", "Noel", "bear", "carnivore", &["Hungry", "Bold"]),
            mk_animal("3", "Erica", "gorilla", "omnivore", &["Shy", "Loyal", "Bold"]),
        ]
    }

    fn candidate(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(object) => object,
            other => panic!("fixture candidate must be an object, got {other}"),
        }
    }

    fn ids(records: &[Animal]) -> Vec<&str> {
        records.iter().map(|animal| animal.id.as_str()).collect()
    }

    fn assert_validation_error_contains(value: Value, expected_substring: &str) {
        let err = match check_candidate(&candidate(value)) {
            Ok(()) => panic!("expected validation error containing: {expected_substring}"),
            Err(err) => err,
        };

        assert!(
            err.to_string().contains(expected_substring),
            "validation error `{err}` did not contain `{expected_substring}`"
        );
    }

    #[test]
    fn validate_accepts_complete_candidate() {
        let value = json!({
            "name": "Rex",
            "species": "dog",
            "diet": "omnivore",
            "personalityTraits": ["Bold"]
        });
        assert!(validate(&candidate(value)));
    }

    #[test]
    fn validate_accepts_empty_traits() {
        let value = json!({
            "name": "Rex",
            "species": "dog",
            "diet": "omnivore",
            "personalityTraits": []
        });
        assert!(validate(&candidate(value)));
    }

    #[test]
    fn validate_rejects_each_missing_field() {
        let complete = json!({
            "name": "Rex",
            "species": "dog",
            "diet": "omnivore",
            "personalityTraits": ["Bold"]
        });
        for field in [NAME_FIELD, SPECIES_FIELD, DIET_FIELD, TRAITS_FIELD] {
            let mut object = candidate(complete.clone());
            object.shift_remove(field);
            assert!(!validate(&object), "candidate without `{field}` should be rejected");
        }
    }

    #[test]
    fn validate_rejects_empty_name() {
        assert_validation_error_contains(
            json!({"name": "", "species": "dog", "diet": "omnivore", "personalityTraits": []}),
            "name MUST be a non-empty string",
        );
    }

    #[test]
    fn validate_rejects_non_string_species() {
        assert_validation_error_contains(
            json!({"name": "Rex", "species": 7, "diet": "omnivore", "personalityTraits": []}),
            "species MUST be a non-empty string",
        );
    }

    #[test]
    fn validate_rejects_scalar_traits() {
        assert_validation_error_contains(
            json!({"name": "Rex", "species": "dog", "diet": "omnivore", "personalityTraits": "Bold"}),
            "personalityTraits MUST be an array",
        );
    }

    #[test]
    fn validate_reports_first_failure_only() {
        assert_validation_error_contains(json!({}), "name MUST be a non-empty string");
    }

    #[test]
    fn from_candidate_assigns_id_and_keeps_extra_fields_in_order() {
        let value = json!({
            "id": "caller-supplied",
            "name": "Rex",
            "zookeeper": "Sam",
            "species": "dog",
            "diet": "omnivore",
            "personalityTraits": ["Bold"],
            "age": 4
        });

        let animal = match Animal::from_candidate("5", candidate(value)) {
            Ok(animal) => animal,
            Err(err) => panic!("candidate should convert: {err}"),
        };

        assert_eq!(animal.id, "5");
        assert_eq!(animal.personality_traits, vec!["Bold".to_string()]);
        assert_eq!(animal.extra.keys().collect::<Vec<_>>(), vec!["zookeeper", "age"]);
    }

    #[test]
    fn from_candidate_rejects_non_string_traits() {
        let value = json!({
            "name": "Rex",
            "species": "dog",
            "diet": "omnivore",
            "personalityTraits": ["Bold", 3]
        });

        let result = Animal::from_candidate("0", candidate(value));
        assert!(matches!(result, Err(KernelError::Validation(message)) if message.contains("entries MUST be strings")));
    }

    #[test]
    fn animal_serializes_with_wire_field_names() {
        let mut animal = mk_animal("0", "Furry", "cat", "herbivore", &["Loyal"]);
        animal.extra.insert("age".to_string(), json!(3));

        let value = match serde_json::to_value(&animal) {
            Ok(value) => value,
            Err(err) => panic!("animal should serialize: {err}"),
        };
        assert_eq!(
            value,
            json!({
                "id": "0",
                "name": "Furry",
                "species": "cat",
                "diet": "herbivore",
                "personalityTraits": ["Loyal"],
                "age": 3
            })
        );
    }

    #[test]
    fn empty_criteria_returns_all_records_in_order() {
        let records = fixture_records();
        let result = filter_by_criteria(&AnimalCriteria::default(), &records);
        assert_eq!(result, records);
    }

    #[test]
    fn diet_filter_uses_exact_equality() {
        let records = fixture_records();
        let criteria = AnimalCriteria { diet: Some("omnivore".to_string()), ..Default::default() };
        assert_eq!(ids(&filter_by_criteria(&criteria, &records)), vec!["1", "3"]);

        let criteria = AnimalCriteria { diet: Some("Omnivore".to_string()), ..Default::default() };
        assert!(filter_by_criteria(&criteria, &records).is_empty());
    }

    #[test]
    fn multiple_traits_require_every_trait() {
        let records = fixture_records();
        let criteria = AnimalCriteria {
            personality_traits: vec!["Loyal".to_string(), "Bold".to_string()],
            ..Default::default()
        };
        assert_eq!(ids(&filter_by_criteria(&criteria, &records)), vec!["1", "3"]);
    }

    #[test]
    fn filters_compose_conjunctively() {
        let records = fixture_records();
        let criteria = AnimalCriteria {
            personality_traits: vec!["Bold".to_string()],
            diet: Some("omnivore".to_string()),
            species: Some("gorilla".to_string()),
            name: Some("Erica".to_string()),
        };
        assert_eq!(ids(&filter_by_criteria(&criteria, &records)), vec!["3"]);
    }

    #[test]
    fn find_by_id_returns_match_or_none() {
        let records = fixture_records();
        assert_eq!(find_by_id("2", &records).map(|animal| animal.name.as_str()), Some("Noel"));
        assert!(find_by_id("99", &records).is_none());
    }

    #[test]
    fn find_by_id_prefers_first_duplicate() {
        let records = vec![
            mk_animal("1", "First", "cat", "herbivore", &[]),
            mk_animal("1", "Second", "cat", "herbivore", &[]),
        ];
        assert_eq!(find_by_id("1", &records).map(|animal| animal.name.as_str()), Some("First"));
    }

    #[test]
    fn query_pairs_collect_traits_and_ignore_unknown_keys() {
        let parsed = AnimalCriteria::from_query_pairs([
            ("personalityTraits", "Loyal"),
            ("personalityTraits[]", "Bold"),
            ("diet", "omnivore"),
            ("sort", "name"),
            ("sort", "diet"),
            ("species", ""),
        ]);

        assert_eq!(
            parsed.criteria,
            AnimalCriteria {
                personality_traits: vec!["Loyal".to_string(), "Bold".to_string()],
                diet: Some("omnivore".to_string()),
                species: None,
                name: None,
            }
        );
        assert_eq!(parsed.ignored_keys, vec!["sort".to_string()]);
    }

    #[test]
    fn query_pairs_keep_last_scalar_value() {
        let parsed = AnimalCriteria::from_query_pairs([("name", "Rex"), ("name", "Furry")]);
        assert_eq!(parsed.criteria.name.as_deref(), Some("Furry"));
    }

    #[test]
    fn form_pairs_collect_traits_into_array() -> Result<(), KernelError> {
        let candidate = candidate_from_form_pairs([
            ("name", "Rex"),
            ("species", "dog"),
            ("diet", "omnivore"),
            ("personalityTraits[]", "Bold"),
            ("personalityTraits", "Loyal"),
            ("favoriteFood", "bones"),
        ]);
        let animal = Animal::from_candidate("4", candidate)?;
        assert_eq!(animal.personality_traits, vec!["Bold".to_string(), "Loyal".to_string()]);
        assert_eq!(animal.extra.get("favoriteFood"), Some(&Value::String("bones".to_string())));

        let single = candidate_from_form_pairs([("personalityTraits", "Shy")]);
        assert_eq!(single.get(TRAITS_FIELD), Some(&json!(["Shy"])));

        let without_traits = candidate_from_form_pairs([("name", "Rex")]);
        assert!(check_candidate(&without_traits).is_err());
        Ok(())
    }

    fn traits_strategy() -> impl Strategy<Value = Vec<String>> {
        proptest::sample::subsequence(TRAIT_POOL.to_vec(), 0..=TRAIT_POOL.len())
            .prop_map(|traits| traits.into_iter().map(ToString::to_string).collect())
    }

    fn records_strategy() -> impl Strategy<Value = Vec<Animal>> {
        proptest::collection::vec((traits_strategy(), 0..DIET_POOL.len()), 0..16).prop_map(
            |rows| {
                rows.into_iter()
                    .enumerate()
                    .map(|(index, (traits, diet))| Animal {
                        id: index.to_string(),
                        name: format!("animal-{index}"),
                        species: "cat".to_string(),
                        diet: DIET_POOL[diet].to_string(),
                        personality_traits: traits,
                        extra: Map::new(),
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn property_traits_filter_selects_exact_supersets(
            records in records_strategy(),
            wanted in traits_strategy(),
        ) {
            let criteria = AnimalCriteria { personality_traits: wanted.clone(), ..Default::default() };
            let result = filter_by_criteria(&criteria, &records);
            let expected = records
                .iter()
                .filter(|animal| wanted.iter().all(|t| animal.personality_traits.contains(t)))
                .cloned()
                .collect::<Vec<_>>();
            prop_assert_eq!(result, expected);
        }
    }

    proptest! {
        #[test]
        fn property_single_trait_with_diet_partitions_records(
            records in records_strategy(),
            trait_index in 0..TRAIT_POOL.len(),
            diet_index in 0..DIET_POOL.len(),
        ) {
            let wanted = TRAIT_POOL[trait_index].to_string();
            let diet = DIET_POOL[diet_index];
            let criteria = AnimalCriteria {
                personality_traits: vec![wanted.clone()],
                diet: Some(diet.to_string()),
                ..Default::default()
            };
            let result = filter_by_criteria(&criteria, &records);

            for animal in &result {
                prop_assert!(animal.personality_traits.contains(&wanted));
            }
            for animal in records.iter().filter(|animal| !result.contains(animal)) {
                prop_assert!(!animal.personality_traits.contains(&wanted) || animal.diet != diet);
            }
        }
    }

    proptest! {
        #[test]
        fn property_empty_criteria_is_identity(records in records_strategy()) {
            prop_assert_eq!(filter_by_criteria(&AnimalCriteria::default(), &records), records);
        }
    }
}

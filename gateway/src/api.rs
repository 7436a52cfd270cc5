use portal_core::models::{ApiId, RequestId};
use portal_core::portal::{ApiChoice, FieldErrors, Submission, INVALID_CHOICE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const INVALID_LIST: &str = "Enter a list of values.";

// Input: a new request from the submission form. Fields stay untyped so a
// malformed value is reported against its field rather than as a bad body.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitForm {
    #[serde(default)]
    pub api_id: Value,
    #[serde(default)]
    pub input_params: Value,
}

impl SubmitForm {
    pub fn into_submission(self) -> Result<Submission, FieldErrors> {
        let mut errors = FieldErrors::default();

        let api_id = match &self.api_id {
            Value::Null => None,
            Value::Number(n) => n.as_i64().or_else(|| {
                errors.add("api_id", INVALID_CHOICE);
                None
            }),
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => s.trim().parse::<ApiId>().ok().or_else(|| {
                errors.add("api_id", INVALID_CHOICE);
                None
            }),
            _ => {
                errors.add("api_id", INVALID_CHOICE);
                None
            }
        };

        let input_params = match self.input_params {
            Value::Null => Vec::new(),
            Value::Array(items) => {
                let mut params = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => params.push(s),
                        Value::Number(n) => params.push(n.to_string()),
                        Value::Bool(b) => params.push(b.to_string()),
                        _ => {
                            errors.add("input_params", INVALID_LIST);
                            break;
                        }
                    }
                }
                params
            }
            _ => {
                errors.add("input_params", INVALID_LIST);
                Vec::new()
            }
        };

        if errors.is_empty() {
            Ok(Submission { api_id, input_params })
        } else {
            Err(errors)
        }
    }
}

// Output: what the form may offer this user
#[derive(Debug, Serialize)]
pub struct ChoicesResponse {
    pub apis: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub request_id: RequestId,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub request_id: RequestId,
    pub file: String,
}

// Kept as text so a malformed id degrades to an empty description.
#[derive(Debug, Deserialize)]
pub struct DescriptionQuery {
    pub api_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(body: Value) -> SubmitForm {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn well_formed_fields_pass_through() {
        let submission = form(json!({"api_id": 3, "input_params": ["a", 7]})).into_submission().unwrap();
        assert_eq!(submission.api_id, Some(3));
        assert_eq!(submission.input_params, vec!["a", "7"]);

        let submission = form(json!({"api_id": " 4 "})).into_submission().unwrap();
        assert_eq!(submission.api_id, Some(4));
        assert!(submission.input_params.is_empty());
    }

    #[test]
    fn missing_id_is_left_for_the_required_check() {
        assert_eq!(form(json!({})).into_submission().unwrap().api_id, None);
        assert_eq!(form(json!({"api_id": ""})).into_submission().unwrap().api_id, None);
    }

    #[test]
    fn malformed_fields_become_field_errors() {
        for bad in [json!("abc"), json!(1.5), json!([1]), json!({"id": 1}), json!(true)] {
            let errors = form(json!({"api_id": bad})).into_submission().unwrap_err();
            assert_eq!(errors.get("api_id"), Some(&[INVALID_CHOICE.to_string()][..]), "api_id = {bad}");
        }

        let errors = form(json!({"api_id": 1, "input_params": "x y"})).into_submission().unwrap_err();
        assert_eq!(errors.get("input_params"), Some(&[INVALID_LIST.to_string()][..]));
        assert_eq!(errors.get("api_id"), None);

        let errors = form(json!({"api_id": 1, "input_params": [["nested"]]})).into_submission().unwrap_err();
        assert_eq!(errors.get("input_params"), Some(&[INVALID_LIST.to_string()][..]));
    }
}

//! Document analyzer: one inference call that turns documentation text
//! into an API catalog.
//!
//! The prompt pins a fixed JSON schema (APIs → endpoints → parameters plus
//! business framing). The reply is all-or-nothing: a response that does not
//! contain a JSON object with an `apis` array fails the whole analysis.

use serde::{Deserialize, Serialize};

use api_harness_core::models::NewApi;
use api_harness_core::structured::NoStructuredOutput;

use crate::inference::{Dispatcher, FileRef, InferenceError, InferenceSettings};

/// The catalog extracted from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCatalog {
    pub apis: Vec<NewApi>,
}

const EXTRACTION_PROMPT: &str = r#"You are an API integration analyst. Read the API documentation provided and extract every API surface it describes.

Respond with exactly one JSON object and nothing else, using this schema:

{
  "apis": [
    {
      "name": "string",
      "description": "string",
      "base_url": "https://host/prefix",
      "auth_type": "none | basic | bearer | api_key | token | ticket | oauth | custom",
      "auth_details": "how to obtain and send credentials",
      "business_value": "why a business would call this API",
      "use_cases": ["string"],
      "auto_executable": true,
      "credentials": { "username": "...", "password": "..." },
      "endpoints": [
        {
          "method": "GET | POST | PUT | PATCH | DELETE",
          "path": "/resource/{id}",
          "description": "string",
          "category": "auth | data_fetch | data_write | other",
          "business_value": "string",
          "parameters": [
            {
              "name": "string",
              "type": "string | integer | boolean | object",
              "in": "query | path | body | header",
              "required": true,
              "description": "string",
              "example": "value shown in the documentation",
              "auto_value": "value to use automatically, if one is obvious"
            }
          ]
        }
      ]
    }
  ]
}

Rules:
- List endpoints in the order a client must call them; authentication endpoints first.
- Mark an endpoint "category": "auth" when it exchanges credentials for a token or session.
- Set "auto_executable" to true only when every endpoint can be called with the credentials and examples present in the document.
- Copy sample credentials only when the document states them verbatim; otherwise use an empty object.
- If the document describes no API, return {"apis": []}."#;

/// The fixed extraction prompt, with the document's MIME type noted.
fn build_prompt(mime_type: &str) -> String {
    format!(
        "{}\n\nThe documentation below was supplied as {}.",
        EXTRACTION_PROMPT, mime_type
    )
}

/// Extract an API catalog from document text.
///
/// When `file` is set, backends that can read uploaded files use it in
/// place of `text`.
pub async fn analyze(
    dispatcher: &Dispatcher,
    text: &str,
    mime_type: &str,
    settings: &InferenceSettings,
    file: Option<&FileRef>,
) -> Result<ExtractedCatalog, InferenceError> {
    let catalog: ExtractedCatalog = dispatcher
        .infer_typed(&build_prompt(mime_type), text, settings, file)
        .await?;
    validate(&catalog)?;
    Ok(catalog)
}

/// Reject catalogs that could not be executed at all.
fn validate(catalog: &ExtractedCatalog) -> Result<(), NoStructuredOutput> {
    for (i, api) in catalog.apis.iter().enumerate() {
        if api.name.trim().is_empty() {
            return Err(NoStructuredOutput::new(format!("apis[{}] has no name", i)));
        }
        for (j, ep) in api.endpoints.iter().enumerate() {
            if ep.method.trim().is_empty() || ep.path.trim().is_empty() {
                return Err(NoStructuredOutput::new(format!(
                    "apis[{}].endpoints[{}] is missing method or path",
                    i, j
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_harness_core::models::AuthType;
    use api_harness_core::structured::extract_typed;

    const REPLY: &str = r#"{"apis":[{"name":"Users API","base_url":"https://x","auth_type":"basic","endpoints":[{"method":"GET","path":"/users","parameters":[]}]}]}"#;

    #[test]
    fn recovers_catalog_through_fences_and_prose() {
        let wrapped = format!(
            "Here is what I found:\n```json\n{}\n```\nLet me know if you need more.",
            REPLY
        );
        let plain: ExtractedCatalog = extract_typed(REPLY).unwrap();
        let fenced: ExtractedCatalog = extract_typed(&wrapped).unwrap();
        assert_eq!(plain, fenced);
        assert_eq!(fenced.apis.len(), 1);
        assert_eq!(fenced.apis[0].auth_type, AuthType::Basic);
        assert_eq!(fenced.apis[0].endpoints[0].path, "/users");
    }

    #[test]
    fn null_fields_read_as_defaults() {
        let catalog: ExtractedCatalog = extract_typed(
            r#"{"apis":[{
                "name": "Orders API",
                "description": null,
                "base_url": null,
                "auth_type": null,
                "use_cases": null,
                "auto_executable": null,
                "credentials": null,
                "endpoints": [
                    {"method": "GET", "path": "/orders", "category": null, "parameters": null},
                    {"method": "POST", "path": "/orders",
                     "parameters": [{"name": "sku", "required": null, "example": null}]}
                ]
            }]}"#,
        )
        .unwrap();
        validate(&catalog).unwrap();

        let api = &catalog.apis[0];
        assert_eq!(api.base_url, "");
        assert_eq!(api.auth_type, AuthType::None);
        assert!(api.use_cases.is_empty());
        assert!(!api.auto_executable);
        assert!(api.credentials.is_empty());
        assert!(api.endpoints[0].parameters.is_empty());
        assert!(!api.endpoints[1].parameters[0].required);
        assert_eq!(api.endpoints[1].parameters[0].example, None);
    }

    #[test]
    fn null_endpoint_list_is_empty() {
        let catalog: ExtractedCatalog =
            extract_typed(r#"{"apis":[{"name":"A","endpoints":null}]}"#).unwrap();
        assert!(catalog.apis[0].endpoints.is_empty());
    }

    #[test]
    fn missing_apis_key_is_no_structured_output() {
        assert!(extract_typed::<ExtractedCatalog>(r#"{"endpoints": []}"#).is_err());
    }

    #[test]
    fn endpoint_without_path_is_rejected() {
        let catalog: ExtractedCatalog = extract_typed(
            r#"{"apis":[{"name":"A","endpoints":[{"method":"GET","path":" "}]}]}"#,
        )
        .unwrap();
        assert!(validate(&catalog).is_err());
    }

    #[test]
    fn prompt_names_mime_type() {
        assert!(build_prompt("application/pdf").ends_with("supplied as application/pdf."));
    }
}

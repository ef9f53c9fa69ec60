use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::makeup::{BeautifyFilter, Category, Color, MakeupParams, ParameterSet};

/// Session description type carried alongside the SDP text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Negotiation request: the complete local offer plus the parameter snapshot
/// the endpoint should start rendering with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub makeup: MakeupParams,
}

impl OfferRequest {
    pub fn new(sdp: String, makeup: MakeupParams) -> Self {
        Self {
            sdp,
            kind: SdpKind::Offer,
            makeup,
        }
    }
}

/// The endpoint's answering session description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpKind,
}

impl AnswerResponse {
    /// Rejects anything that is not a non-empty answer.
    pub fn validate(&self) -> Result<()> {
        if self.kind != SdpKind::Answer {
            return Err(Error::negotiation(format!(
                "expected an answer description, got {:?}",
                self.kind
            )));
        }
        if self.sdp.trim().is_empty() {
            return Err(Error::negotiation("answer carried an empty sdp"));
        }
        Ok(())
    }
}

/// Encodes the data-channel parameter push (`{ selectedMakeup, blendIntensity }`).
pub fn encode_parameter_push(params: &MakeupParams) -> Result<String> {
    Ok(serde_json::to_string(params)?)
}

pub fn decode_parameter_push(text: &str) -> Result<MakeupParams> {
    Ok(serde_json::from_str(text)?)
}

/// Shade options per category, as returned by `GET /unique_shades`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadeCatalog {
    pub shades: BTreeMap<Category, Vec<Color>>,
}

impl ShadeCatalog {
    /// Parses the endpoint body. Unknown categories and colors that are not
    /// `#RRGGBB` are skipped; an `{"error": ...}` body is an error.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::serialization("shade catalog is not an object"))?;
        if let Some(err) = obj.get("error") {
            return Err(Error::http(format!("shade catalog unavailable: {err}")));
        }

        let mut shades = BTreeMap::new();
        for (key, list) in obj {
            let Ok(category) = serde_json::from_value::<Category>(key.clone().into()) else {
                tracing::debug!(category = %key, "skipping unknown shade category");
                continue;
            };
            let colors: Vec<Color> = list
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .filter_map(|s| s.parse().ok())
                        .collect()
                })
                .unwrap_or_default();
            shades.insert(category, colors);
        }
        Ok(Self { shades })
    }

    pub fn get(&self, category: Category) -> &[Color] {
        self.shades.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First listed shade of every non-empty category.
    pub fn first_shades(&self) -> impl Iterator<Item = (Category, Color)> + '_ {
        self.shades
            .iter()
            .filter_map(|(category, colors)| colors.first().map(|c| (*category, *c)))
    }
}

/// Body of `POST /products`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    pub selected_makeup: ParameterSet,
}

/// A catalog product. Documents are passed through as-is; only a few
/// well-known fields get accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Product(pub serde_json::Map<String, serde_json::Value>);

impl Product {
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(|v| v.as_str())
    }

    pub fn brand(&self) -> Option<&str> {
        self.0.get("brand").and_then(|v| v.as_str())
    }
}

/// Response of `POST /products`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductRecommendations {
    #[serde(default)]
    pub products: BTreeMap<String, Vec<Product>>,
}

/// Response of `POST /beautify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeautifyResponse {
    pub skin_tone: String,
    pub filter: BeautifyFilter,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::makeup::Intensity;

    #[test]
    fn test_offer_request_wire_shape() {
        let req = OfferRequest::new(
            "v=0\r\n".into(),
            MakeupParams {
                selected_makeup: ParameterSet::default(),
                blend_intensity: Intensity::new(0.2),
            },
        );
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0\r\n");
        assert_eq!(json["makeup"]["selectedMakeup"]["EYELINER_LEFT"], "#000000");
        assert!(json["makeup"]["blendIntensity"].is_number());
    }

    #[test]
    fn test_answer_validation() {
        let ok: AnswerResponse =
            serde_json::from_str(r#"{"sdp":"v=0","type":"answer"}"#).expect("parse");
        assert!(ok.validate().is_ok());

        let wrong: AnswerResponse =
            serde_json::from_str(r#"{"sdp":"v=0","type":"offer"}"#).expect("parse");
        assert!(matches!(wrong.validate(), Err(Error::Negotiation(_))));

        let empty: AnswerResponse =
            serde_json::from_str(r#"{"sdp":"  ","type":"answer"}"#).expect("parse");
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_answer_rejects_unknown_type() {
        assert!(serde_json::from_str::<AnswerResponse>(r#"{"sdp":"v=0","type":"pranswer"}"#).is_err());
    }

    #[test]
    fn test_shade_catalog_skips_bad_entries() {
        let body = serde_json::json!({
            "Lipstick": ["#ff0000", "not-a-color", "#00FF00"],
            "Eyebrow": [],
            "Glitter": ["#FFFFFF"],
        });
        let catalog = ShadeCatalog::from_json(&body).expect("parse");
        assert_eq!(
            catalog.get(Category::Lip),
            &[Color::rgb(0xFF, 0, 0), Color::rgb(0, 0xFF, 0)]
        );
        assert!(catalog.get(Category::Eyebrow).is_empty());
        assert!(catalog.get(Category::Blush).is_empty());
        let firsts: Vec<_> = catalog.first_shades().collect();
        assert_eq!(firsts, vec![(Category::Lip, Color::rgb(0xFF, 0, 0))]);
    }

    #[test]
    fn test_shade_catalog_error_body() {
        let body = serde_json::json!({ "error": "database offline" });
        assert!(matches!(ShadeCatalog::from_json(&body), Err(Error::Http(_))));
    }

    #[test]
    fn test_beautify_response_parses() {
        let body = r##"{"skin_tone":"mid_light","filter":{"Lipstick":"#FF69B4","Eyeliner":"#111111","Eyeshadow":"#660033","Eyebrow":"#3B2F2F","Blush":"#FF1493","Foundation":"#FAFAD2"}}"##;
        let parsed: BeautifyResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.skin_tone, "mid_light");
        assert_eq!(parsed.filter.blush, Color::rgb(0xFF, 0x14, 0x93));
    }

    #[test]
    fn test_parameter_push_is_bare_params() {
        let params = MakeupParams::default();
        let text = encode_parameter_push(&params).expect("encode");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        let keys: Vec<_> = value.as_object().expect("object").keys().cloned().collect();
        assert_eq!(keys, vec!["blendIntensity".to_string(), "selectedMakeup".to_string()]);
        assert_eq!(decode_parameter_push(&text).expect("decode"), params);
    }
}

//! Parsing and validation of day-ahead price documents.

use std::collections::BTreeMap;

use roxmltree::{Document, Node};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::time::{parse_document_timestamp, parse_resolution};

/// Scalar fields every price document must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    DocumentType,
    CurveType,
    Currency,
    PriceUnit,
    PeriodStart,
    PeriodEnd,
    Resolution,
}

struct FieldSpec {
    field: Field,
    path: &'static str,
    expected: Option<&'static str>,
}

const FIELDS: [FieldSpec; 7] = [
    FieldSpec {
        field: Field::DocumentType,
        path: "type",
        expected: Some("A44"),
    },
    FieldSpec {
        field: Field::CurveType,
        path: "TimeSeries/curveType",
        expected: Some("A01"),
    },
    FieldSpec {
        field: Field::Currency,
        path: "TimeSeries/currency_Unit.name",
        expected: Some("EUR"),
    },
    FieldSpec {
        field: Field::PriceUnit,
        path: "TimeSeries/price_Measure_Unit.name",
        expected: None,
    },
    FieldSpec {
        field: Field::PeriodStart,
        path: "TimeSeries/Period/timeInterval/start",
        expected: None,
    },
    FieldSpec {
        field: Field::PeriodEnd,
        path: "TimeSeries/Period/timeInterval/end",
        expected: None,
    },
    FieldSpec {
        field: Field::Resolution,
        path: "TimeSeries/Period/resolution",
        expected: None,
    },
];

const POINT_PATH: &str = "TimeSeries/Period/Point";
const POSITION_PATH: &str = "position";
const AMOUNT_PATH: &str = "price.amount";

/// Prices of one document, keyed by the start of each price slot in seconds
/// since the Unix epoch (UTC).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSeries {
    unit: String,
    period_start: i64,
    period_end: i64,
    resolution_seconds: u32,
    prices: BTreeMap<i64, f64>,
}

impl PriceSeries {
    /// Unit of the prices, e.g. `EUR/MWh`.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn period_start(&self) -> i64 {
        self.period_start
    }

    pub fn period_end(&self) -> i64 {
        self.period_end
    }

    pub fn resolution_seconds(&self) -> u32 {
        self.resolution_seconds
    }

    /// Price of the slot starting at `timestamp`, if the document had one.
    pub fn get(&self, timestamp: i64) -> Option<f64> {
        self.prices.get(&timestamp).copied()
    }

    /// Iterates over `(timestamp, price)` pairs in ascending time order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.prices.iter().map(|(&timestamp, &price)| (timestamp, price))
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn prices(&self) -> &BTreeMap<i64, f64> {
        &self.prices
    }

    pub fn into_prices(self) -> BTreeMap<i64, f64> {
        self.prices
    }
}

/// Element lookup by slash-separated path, relative to a context node.
///
/// Unprefixed segments resolve to the document's default namespace, or to no
/// namespace if the root declares none. Prefixed segments (`p:name`) resolve
/// through the prefixes in scope at the root element.
struct Lookup<'a, 'input> {
    root: Node<'a, 'input>,
    default_namespace: Option<&'a str>,
}

impl<'a, 'input> Lookup<'a, 'input> {
    fn new(document: &'a Document<'input>) -> Self {
        let root = document.root_element();
        Self {
            root,
            default_namespace: root.lookup_namespace_uri(None),
        }
    }

    fn qualify(&self, segment: &'static str) -> Option<(Option<&'a str>, &'static str)> {
        match segment.split_once(':') {
            Some((prefix, name)) => {
                let namespace = self.root.lookup_namespace_uri(Some(prefix))?;
                Some((Some(namespace), name))
            }
            None => Some((self.default_namespace, segment)),
        }
    }

    fn find_all(&self, context: Node<'a, 'input>, path: &'static str) -> Vec<Node<'a, 'input>> {
        path.split('/').fold(vec![context], |nodes, segment| {
            let Some((namespace, name)) = self.qualify(segment) else {
                return Vec::new();
            };

            nodes
                .into_iter()
                .flat_map(|node| node.children())
                .filter(|child| {
                    child.is_element()
                        && child.tag_name().name() == name
                        && child.tag_name().namespace() == namespace
                })
                .collect()
        })
    }

    fn find(&self, context: Node<'a, 'input>, path: &'static str) -> Option<Node<'a, 'input>> {
        self.find_all(context, path).into_iter().next()
    }

    fn text(&self, context: Node<'a, 'input>, path: &'static str) -> Option<&'a str> {
        self.find(context, path)
            .map(|node| node.text().unwrap_or_default())
    }
}

/// Builds the unit string, e.g. `EUR` and `MWH` become `EUR/MWh`.
pub fn derive_unit(currency: &str, price_unit: &str) -> String {
    let unit = format!("{currency}/{price_unit}");
    match unit.strip_suffix("WH") {
        Some(stem) => format!("{stem}Wh"),
        None => unit,
    }
}

/// Parses a price document into a [`PriceSeries`].
///
/// The document must carry every required field with its expected value,
/// where one is defined. Each `Point` is placed at
/// `period_start + (position - 1) * resolution`. A later point with the same
/// timestamp replaces an earlier one.
pub fn parse_price_document(xml: &str) -> Result<PriceSeries, ParseError> {
    let document = Document::parse(xml)?;
    let lookup = Lookup::new(&document);

    let mut values = [""; FIELDS.len()];
    for spec in &FIELDS {
        let value = lookup
            .text(lookup.root, spec.path)
            .ok_or(ParseError::MissingField { path: spec.path })?;

        if let Some(expected) = spec.expected {
            if value != expected {
                return Err(ParseError::UnexpectedValue {
                    path: spec.path,
                    value: value.to_owned(),
                });
            }
        }

        values[spec.field as usize] = value;
    }

    let unit = derive_unit(
        values[Field::Currency as usize],
        values[Field::PriceUnit as usize],
    );
    let period_start = parse_document_timestamp(values[Field::PeriodStart as usize])?;
    let period_end = parse_document_timestamp(values[Field::PeriodEnd as usize])?;
    let resolution_seconds = parse_resolution(values[Field::Resolution as usize])?;

    let mut prices = BTreeMap::new();
    for point in lookup.find_all(lookup.root, POINT_PATH) {
        let position = parse_point_field::<i64>(&lookup, point, POSITION_PATH)?;
        let price = parse_point_field::<f64>(&lookup, point, AMOUNT_PATH)?;

        if !price.is_finite() {
            return Err(ParseError::InvalidPointField {
                field: AMOUNT_PATH,
                value: price.to_string(),
            });
        }

        let timestamp = position
            .checked_sub(1)
            .filter(|&offset| offset >= 0)
            .and_then(|offset| offset.checked_mul(i64::from(resolution_seconds)))
            .and_then(|offset| offset.checked_add(period_start))
            .ok_or(ParseError::InvalidPosition { position })?;

        if let Some(previous) = prices.insert(timestamp, price) {
            warn!(position, timestamp, previous, price, "duplicate price point replaced");
        }
    }

    debug!(
        points = prices.len(),
        period_start,
        period_end,
        resolution_seconds,
        %unit,
        "parsed price document"
    );

    Ok(PriceSeries {
        unit,
        period_start,
        period_end,
        resolution_seconds,
        prices,
    })
}

fn parse_point_field<'a, 'input, T: std::str::FromStr>(
    lookup: &Lookup<'a, 'input>,
    point: Node<'a, 'input>,
    path: &'static str,
) -> Result<T, ParseError> {
    let text = lookup
        .text(point, path)
        .ok_or(ParseError::MissingPointField { field: path })?;

    text.trim()
        .parse()
        .map_err(|_| ParseError::InvalidPointField {
            field: path,
            value: text.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_AHEAD: &str = include_str!("../testdata/a44_day_ahead.xml");
    const NAMESPACE: &str =
        r#" xmlns="urn:iec62325.351:tc57wg16:451-3:publicationdocument:7:0""#;
    // 2023-03-14T23:00Z
    const PERIOD_START: i64 = 1678834800;

    #[test]
    fn test_parse_day_ahead_document() {
        let series = parse_price_document(DAY_AHEAD).unwrap();

        assert_eq!(series.unit(), "EUR/MWh");
        assert_eq!(series.period_start(), PERIOD_START);
        assert_eq!(series.period_end(), PERIOD_START + 86400);
        assert_eq!(series.resolution_seconds(), 3600);
        assert_eq!(series.len(), 24);
        assert_eq!(series.get(PERIOD_START), Some(95.10));
        assert_eq!(series.get(PERIOD_START + 7 * 3600), Some(131.42));
        assert_eq!(series.get(PERIOD_START + 23 * 3600), Some(97.25));
        assert_eq!(series.get(PERIOD_START + 24 * 3600), None);
    }

    #[test]
    fn test_timestamps_follow_resolution() {
        let xml = DAY_AHEAD.replace("PT60M", "PT15M");
        let series = parse_price_document(&xml).unwrap();

        let timestamps = series.iter().map(|(timestamp, _)| timestamp).collect::<Vec<_>>();
        let expected = (0..24).map(|i| PERIOD_START + i * 900).collect::<Vec<_>>();
        assert_eq!(timestamps, expected);
    }

    #[test]
    fn test_positions_with_gaps() {
        let xml = DAY_AHEAD
            .replace("<position>1</position>", "<position>3</position>")
            .replace("<position>2</position>", "<position>30</position>");
        let series = parse_price_document(&xml).unwrap();

        // position 3 appears twice, the later point wins
        assert_eq!(series.len(), 23);
        assert_eq!(series.get(PERIOD_START), None);
        assert_eq!(series.get(PERIOD_START + 2 * 3600), Some(86.02));
        assert_eq!(series.get(PERIOD_START + 29 * 3600), Some(89.47));
    }

    #[test]
    fn test_document_without_namespace() {
        let xml = DAY_AHEAD.replace(NAMESPACE, "");
        let series = parse_price_document(&xml).unwrap();

        assert_eq!(series, parse_price_document(DAY_AHEAD).unwrap());
    }

    #[test]
    fn test_prefixed_elements_are_not_default_namespace() {
        let xml = DAY_AHEAD
            .replace(NAMESPACE, &NAMESPACE.replace("xmlns", "xmlns:pub"))
            .replace("<type>", "<pub:type>")
            .replace("</type>", "</pub:type>");

        // without a default namespace, unprefixed `type` matches nothing
        assert!(matches!(
            parse_price_document(&xml),
            Err(ParseError::MissingField { path: "type" })
        ));
    }

    #[test]
    fn test_prefixed_lookup() {
        let xml = r#"<doc xmlns="urn:a" xmlns:b="urn:b"><b:item>x</b:item><item>y</item></doc>"#;
        let document = Document::parse(xml).unwrap();
        let lookup = Lookup::new(&document);

        assert_eq!(lookup.text(lookup.root, "b:item"), Some("x"));
        assert_eq!(lookup.text(lookup.root, "item"), Some("y"));
        assert_eq!(lookup.text(lookup.root, "c:item"), None);
    }

    #[test]
    fn test_missing_curve_type() {
        let xml = DAY_AHEAD.replace("<curveType>A01</curveType>", "");

        let err = parse_price_document(&xml).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingField {
                path: "TimeSeries/curveType"
            }
        ));
        assert_eq!(err.to_string(), "unknown field: TimeSeries/curveType");
    }

    #[test]
    fn test_missing_unchecked_field() {
        let xml = DAY_AHEAD.replace("<resolution>PT60M</resolution>", "");

        assert!(matches!(
            parse_price_document(&xml),
            Err(ParseError::MissingField {
                path: "TimeSeries/Period/resolution"
            })
        ));
    }

    #[test]
    fn test_unexpected_document_type() {
        let xml = DAY_AHEAD.replace("<type>A44</type>", "<type>A09</type>");

        let err = parse_price_document(&xml).unwrap_err();
        assert!(matches!(
            &err,
            ParseError::UnexpectedValue { path: "type", value } if value == "A09"
        ));
        assert_eq!(err.to_string(), "unexpected value: type = A09");
    }

    #[test]
    fn test_unexpected_currency() {
        let xml = DAY_AHEAD.replace(
            "<currency_Unit.name>EUR</currency_Unit.name>",
            "<currency_Unit.name>GBP</currency_Unit.name>",
        );

        assert!(matches!(
            parse_price_document(&xml),
            Err(ParseError::UnexpectedValue {
                path: "TimeSeries/currency_Unit.name",
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_xml() {
        let xml = DAY_AHEAD.replace("</Publication_MarketDocument>", "");

        assert!(matches!(
            parse_price_document(&xml),
            Err(ParseError::Xml(_))
        ));
    }

    #[test]
    fn test_invalid_period_start() {
        let xml = DAY_AHEAD.replacen("2023-03-14T23:00Z", "2023-03-14T23:00:00Z", 2);

        assert!(matches!(
            parse_price_document(&xml),
            Err(ParseError::Timestamp { .. })
        ));
    }

    #[test]
    fn test_unknown_resolution_unit() {
        let xml = DAY_AHEAD.replace("PT60M", "PT1X");

        assert!(matches!(
            parse_price_document(&xml),
            Err(ParseError::ResolutionUnit { .. })
        ));
    }

    #[test]
    fn test_point_without_amount() {
        let xml = DAY_AHEAD.replace("<price.amount>84.91</price.amount>", "");

        assert!(matches!(
            parse_price_document(&xml),
            Err(ParseError::MissingPointField {
                field: "price.amount"
            })
        ));
    }

    #[test]
    fn test_point_with_invalid_values() {
        let xml = DAY_AHEAD.replace("<position>4</position>", "<position>four</position>");
        assert!(matches!(
            parse_price_document(&xml),
            Err(ParseError::InvalidPointField {
                field: "position",
                ..
            })
        ));

        let xml = DAY_AHEAD.replace("84.91", "NaN");
        assert!(matches!(
            parse_price_document(&xml),
            Err(ParseError::InvalidPointField {
                field: "price.amount",
                ..
            })
        ));
    }

    #[test]
    fn test_position_below_one() {
        let xml = DAY_AHEAD.replace("<position>1</position>", "<position>0</position>");

        assert!(matches!(
            parse_price_document(&xml),
            Err(ParseError::InvalidPosition { position: 0 })
        ));
    }

    #[test]
    fn test_negative_prices() {
        let xml = DAY_AHEAD.replace("80.03", "-12.50");
        let series = parse_price_document(&xml).unwrap();

        assert_eq!(series.get(PERIOD_START + 13 * 3600), Some(-12.5));
    }

    #[test]
    fn test_derive_unit() {
        assert_eq!(derive_unit("EUR", "MWH"), "EUR/MWh");
        assert_eq!(derive_unit("EUR", "KWH"), "EUR/KWh");
        assert_eq!(derive_unit("EUR", "MW"), "EUR/MW");
    }

    #[test]
    fn test_serialize_series() {
        let series = parse_price_document(DAY_AHEAD).unwrap();
        let json = serde_json::to_value(&series).unwrap();

        assert_eq!(json["unit"], "EUR/MWh");
        assert_eq!(json["resolution_seconds"], 3600);
        assert_eq!(json["prices"]["1678834800"], 95.1);
    }
}

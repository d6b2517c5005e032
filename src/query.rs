//! Query composition: translates an incoming filter/sort/pagination parameter
//! map into an immutable `QueryDescriptor` value, plus the geospatial radius
//! helpers. Composition is a pure function of its inputs; no state is shared
//! across requests. Column names never come from user input: every filterable
//! or sortable field must appear in the entity's typed field set.

use std::collections::HashMap;

use crate::error::AppError;

/// Reserved pagination/meta keys, excluded from filtering.
pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];

/// One page-size policy everywhere: lists default to 10 items.
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// How a filter value is typed when bound into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Numeric,
    Boolean,
}

/// A single filterable column: name as exposed in the API (identical to the
/// SQL column) and its value kind.
pub struct FilterField {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// The typed field set for one entity: which columns may be filtered on and
/// which may be sorted on.
pub struct EntityFields {
    pub filterable: &'static [FilterField],
    pub sortable: &'static [&'static str],
}

pub const PROPERTY_FIELDS: EntityFields = EntityFields {
    filterable: &[
        FilterField { name: "price", kind: FieldKind::Numeric },
        FilterField { name: "bedrooms", kind: FieldKind::Numeric },
        FilterField { name: "bathrooms", kind: FieldKind::Numeric },
        FilterField { name: "area", kind: FieldKind::Numeric },
        FilterField { name: "ratings_average", kind: FieldKind::Numeric },
        FilterField { name: "year_built", kind: FieldKind::Numeric },
        FilterField { name: "parking_spaces", kind: FieldKind::Numeric },
        FilterField { name: "property_type", kind: FieldKind::Text },
        FilterField { name: "price_per", kind: FieldKind::Text },
        FilterField { name: "area_unit", kind: FieldKind::Text },
        FilterField { name: "status", kind: FieldKind::Text },
        FilterField { name: "furnishing_status", kind: FieldKind::Text },
        FilterField { name: "slug", kind: FieldKind::Text },
        FilterField { name: "is_featured", kind: FieldKind::Boolean },
    ],
    sortable: &[
        "price",
        "bedrooms",
        "bathrooms",
        "area",
        "ratings_average",
        "views",
        "created_at",
        "updated_at",
    ],
};

pub const USER_FIELDS: EntityFields = EntityFields {
    filterable: &[
        FilterField { name: "role", kind: FieldKind::Text },
        FilterField { name: "active", kind: FieldKind::Boolean },
        FilterField { name: "email_verified", kind: FieldKind::Boolean },
    ],
    sortable: &["name", "email", "created_at"],
};

pub const REVIEW_FIELDS: EntityFields = EntityFields {
    filterable: &[FilterField { name: "rating", kind: FieldKind::Numeric }],
    sortable: &["rating", "created_at"],
};

/// Comparison operator tokens accepted in `field[op]=value` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "gt" => Some(CmpOp::Gt),
            "gte" => Some(CmpOp::Gte),
            "lt" => Some(CmpOp::Lt),
            "lte" => Some(CmpOp::Lte),
            _ => None,
        }
    }

    /// The operator in the underlying query language.
    pub fn sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        }
    }
}

/// A filter value, typed per the field set so it can be bound (never
/// interpolated) into SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Number(f64),
    Boolean(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub column: &'static str,
    pub op: CmpOp,
    pub value: FilterValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortClause {
    pub column: &'static str,
    pub descending: bool,
}

/// QueryDescriptor
///
/// The immutable output of composition: everything the repository needs to
/// build the SQL query, and everything the handler needs to shape the response
/// (field selection, pagination validation).
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    pub filters: Vec<FilterClause>,
    pub sort: Vec<SortClause>,
    /// Comma-separated allow-list of response fields; None keeps everything.
    pub fields: Option<Vec<String>>,
    pub page: i64,
    pub limit: i64,
    /// Whether the client asked for an explicit page (drives the
    /// beyond-last-page error).
    pub page_requested: bool,
}

impl QueryDescriptor {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    /// Requesting an explicit page beyond the available item count is a client
    /// error, not an empty list.
    pub fn validate_page(&self, total: i64) -> Result<(), AppError> {
        if self.page_requested && self.offset() >= total {
            return Err(AppError::Validation("This page does not exist".to_string()));
        }
        Ok(())
    }
}

/// Composes a `QueryDescriptor` from the raw query-parameter map.
///
/// Keys other than the reserved set are filters: either a plain `field=value`
/// equality or a `field[op]=value` comparison with op in gt/gte/lt/lte. A key
/// naming a column outside the entity's field set is rejected.
pub fn compose(
    params: &HashMap<String, String>,
    entity: &EntityFields,
) -> Result<QueryDescriptor, AppError> {
    let mut filters = Vec::new();

    for (key, value) in params {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }

        let (name, op) = match key.split_once('[') {
            Some((name, rest)) => {
                let token = rest.strip_suffix(']').ok_or_else(|| {
                    AppError::Validation(format!("Malformed filter key: {key}"))
                })?;
                let op = CmpOp::parse(token).ok_or_else(|| {
                    AppError::Validation(format!("Unknown filter operator: {token}"))
                })?;
                (name, op)
            }
            None => (key.as_str(), CmpOp::Eq),
        };

        let field = entity
            .filterable
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| AppError::Validation(format!("Cannot filter on field: {name}")))?;

        let value = parse_value(field, value)?;
        filters.push(FilterClause { column: field.name, op, value });
    }

    // Deterministic clause order regardless of map iteration.
    filters.sort_by_key(|f| f.column);

    let sort = match params.get("sort") {
        Some(spec) => parse_sort(spec, entity)?,
        // Default: newest first.
        None => vec![SortClause { column: "created_at", descending: true }],
    };

    let fields = params.get("fields").map(|spec| {
        spec.split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect()
    });

    let page_requested = params.contains_key("page");
    let page = parse_positive(params.get("page"), 1, "page")?;
    let limit = parse_positive(params.get("limit"), DEFAULT_PAGE_SIZE, "limit")?;

    Ok(QueryDescriptor { filters, sort, fields, page, limit, page_requested })
}

fn parse_value(field: &FilterField, raw: &str) -> Result<FilterValue, AppError> {
    match field.kind {
        FieldKind::Text => Ok(FilterValue::Text(raw.to_string())),
        FieldKind::Numeric => raw
            .parse::<f64>()
            .map(FilterValue::Number)
            .map_err(|_| AppError::Validation(format!("Invalid number for {}: {raw}", field.name))),
        FieldKind::Boolean => match raw {
            "true" => Ok(FilterValue::Boolean(true)),
            "false" => Ok(FilterValue::Boolean(false)),
            _ => Err(AppError::Validation(format!(
                "Invalid boolean for {}: {raw}",
                field.name
            ))),
        },
    }
}

fn parse_sort(spec: &str, entity: &EntityFields) -> Result<Vec<SortClause>, AppError> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|token| {
            let (name, descending) = match token.strip_prefix('-') {
                Some(name) => (name, true),
                None => (token, false),
            };
            let column = entity
                .sortable
                .iter()
                .find(|c| **c == name)
                .copied()
                .ok_or_else(|| AppError::Validation(format!("Cannot sort on field: {name}")))?;
            Ok(SortClause { column, descending })
        })
        .collect()
}

fn parse_positive(raw: Option<&String>, default: i64, what: &str) -> Result<i64, AppError> {
    match raw {
        None => Ok(default),
        Some(s) => match s.parse::<i64>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(AppError::Validation(format!("Invalid {what}: {s}"))),
        },
    }
}

/// Applies the `fields` allow-list to a response JSON value, recursing into
/// arrays. `id` is always kept so list items stay addressable.
pub fn select_fields(value: serde_json::Value, fields: &[String]) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(k, _)| k == "id" || fields.iter().any(|f| f == k))
                .collect(),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.into_iter().map(|v| select_fields(v, fields)).collect(),
        ),
        other => other,
    }
}

// --- Geospatial Radius Search ---

/// Earth's mean radius used for angular conversion, per distance unit.
pub const EARTH_RADIUS_MILES: f64 = 3963.2;
pub const EARTH_RADIUS_KM: f64 = 6378.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    pub fn parse(token: &str) -> Result<Self, AppError> {
        match token {
            "mi" => Ok(DistanceUnit::Miles),
            "km" => Ok(DistanceUnit::Kilometers),
            other => Err(AppError::Validation(format!(
                "Unit must be mi or km, got: {other}"
            ))),
        }
    }
}

/// Converts a surface distance into an angular radius (radians) by dividing by
/// Earth's mean radius in the matching unit.
pub fn angular_radius(distance: f64, unit: DistanceUnit) -> f64 {
    match unit {
        DistanceUnit::Miles => distance / EARTH_RADIUS_MILES,
        DistanceUnit::Kilometers => distance / EARTH_RADIUS_KM,
    }
}

/// Parses a "lat,lng" path segment into a validated (lat, lng) pair.
pub fn parse_latlng(raw: &str) -> Result<(f64, f64), AppError> {
    let err = || {
        AppError::Validation(
            "Please provide latitude and longitude in the format lat,lng.".to_string(),
        )
    };
    let (lat_s, lng_s) = raw.split_once(',').ok_or_else(err)?;
    let lat: f64 = lat_s.trim().parse().map_err(|_| err())?;
    let lng: f64 = lng_s.trim().parse().map_err(|_| err())?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(err());
    }
    Ok((lat, lng))
}

/// Central angle (radians) between two points, via the spherical law of
/// cosines. The cosine is clamped so floating error at zero distance can
/// never escape acos's domain.
pub fn central_angle(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dl = (lng2 - lng1).to_radians();
    let cos = p1.sin() * p2.sin() + p1.cos() * p2.cos() * dl.cos();
    cos.clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reserved_keys_are_not_filters() {
        let desc = compose(
            &params(&[("page", "2"), ("sort", "price"), ("limit", "5"), ("fields", "title")]),
            &PROPERTY_FIELDS,
        )
        .unwrap();
        assert!(desc.filters.is_empty());
        assert_eq!(desc.page, 2);
        assert_eq!(desc.limit, 5);
    }

    #[test]
    fn comparison_operators_translate() {
        let desc = compose(
            &params(&[("price[gte]", "1000"), ("bedrooms[lt]", "4"), ("status", "available")]),
            &PROPERTY_FIELDS,
        )
        .unwrap();
        assert_eq!(desc.filters.len(), 3);

        let price = desc.filters.iter().find(|f| f.column == "price").unwrap();
        assert_eq!(price.op, CmpOp::Gte);
        assert_eq!(price.value, FilterValue::Number(1000.0));
        assert_eq!(price.op.sql(), ">=");

        let status = desc.filters.iter().find(|f| f.column == "status").unwrap();
        assert_eq!(status.op, CmpOp::Eq);
    }

    #[test]
    fn unknown_fields_and_operators_are_rejected() {
        assert!(compose(&params(&[("password_hash", "x")]), &PROPERTY_FIELDS).is_err());
        assert!(compose(&params(&[("price[like]", "1")]), &PROPERTY_FIELDS).is_err());
        assert!(compose(&params(&[("price[gte]", "abc")]), &PROPERTY_FIELDS).is_err());
    }

    #[test]
    fn sort_defaults_to_newest_first() {
        let desc = compose(&params(&[]), &PROPERTY_FIELDS).unwrap();
        assert_eq!(
            desc.sort,
            vec![SortClause { column: "created_at", descending: true }]
        );
    }

    #[test]
    fn sort_list_is_applied_in_order() {
        let desc = compose(&params(&[("sort", "price,-ratings_average")]), &PROPERTY_FIELDS).unwrap();
        assert_eq!(desc.sort[0], SortClause { column: "price", descending: false });
        assert_eq!(desc.sort[1], SortClause { column: "ratings_average", descending: true });
        assert!(compose(&params(&[("sort", "password_hash")]), &PROPERTY_FIELDS).is_err());
    }

    #[test]
    fn page_beyond_total_is_an_error() {
        let desc = compose(&params(&[("page", "3"), ("limit", "10")]), &PROPERTY_FIELDS).unwrap();
        assert!(desc.validate_page(20).is_err());
        assert!(desc.validate_page(21).is_ok());

        // Without an explicit page, short lists are fine.
        let desc = compose(&params(&[]), &PROPERTY_FIELDS).unwrap();
        assert!(desc.validate_page(0).is_ok());
    }

    #[test]
    fn field_selection_prunes_response_keys() {
        let value = serde_json::json!([
            {"id": "a", "title": "one", "price": 1.0, "views": 3},
            {"id": "b", "title": "two", "price": 2.0, "views": 4}
        ]);
        let picked = select_fields(value, &["title".to_string()]);
        assert_eq!(
            picked,
            serde_json::json!([
                {"id": "a", "title": "one"},
                {"id": "b", "title": "two"}
            ])
        );
    }

    #[test]
    fn angular_radius_divides_by_earth_radius() {
        assert!((angular_radius(3963.2, DistanceUnit::Miles) - 1.0).abs() < 1e-12);
        assert!((angular_radius(6378.1, DistanceUnit::Kilometers) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn latlng_parsing_validates_ranges() {
        assert_eq!(parse_latlng("25.2048,55.2708").unwrap(), (25.2048, 55.2708));
        assert!(parse_latlng("25.2048").is_err());
        assert!(parse_latlng("95.0,55.0").is_err());
        assert!(parse_latlng("abc,def").is_err());
    }

    #[test]
    fn center_point_is_always_inside_any_positive_radius() {
        let angle = central_angle(25.2048, 55.2708, 25.2048, 55.2708);
        assert_eq!(angle, 0.0);
        assert!(angle <= angular_radius(0.001, DistanceUnit::Kilometers));
    }

    #[test]
    fn far_point_is_outside_a_small_radius() {
        // Dubai -> London is far more than 10km.
        let angle = central_angle(25.2048, 55.2708, 51.5074, -0.1278);
        assert!(angle > angular_radius(10.0, DistanceUnit::Kilometers));
    }
}

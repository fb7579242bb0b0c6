//! ERDDAP `griddap` client.
//!
//! Queries a single grid cell as CSV:
//!
//! ```text
//! {base_url}/{dataset}.csv?{var}[(date):1:(date)][(lat):1:(lat)][(lon):1:(lon)]
//! ```
//!
//! ERDDAP answers with a header row, a units row, and one data row, e.g.
//!
//! ```text
//! time,latitude,longitude,sst
//! UTC,degrees_north,degrees_east,degree_C
//! 2019-07-16T00:00:00Z,25.73,280.12,29.412
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::{FetchOutcome, GridCellKey, GridDataset, GridSource, SamplerError};

const USER_AGENT: &str = concat!("shark-env-sampler/", env!("CARGO_PKG_VERSION"));

/// Maximum length of a response body included in log messages.
const BODY_PREVIEW_LEN: usize = 200;

/// [`GridSource`] backed by an ERDDAP server over HTTP.
pub struct HttpGridSource {
    client: reqwest::Client,
    dataset: GridDataset,
}

impl HttpGridSource {
    /// Builds a client with the dataset's timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SamplerError::Http`] if the HTTP client cannot be built.
    pub fn new(dataset: GridDataset) -> Result<Self, SamplerError> {
        let client = reqwest::Client::builder()
            .timeout(dataset.timeout())
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, dataset })
    }

    #[must_use]
    pub const fn dataset(&self) -> &GridDataset {
        &self.dataset
    }

    /// The CSV query URL for one grid cell.
    #[must_use]
    pub fn query_url(&self, cell: &GridCellKey) -> String {
        query_url(&self.dataset, cell)
    }
}

/// Builds the single-cell CSV query URL for `cell`.
#[must_use]
pub fn query_url(dataset: &GridDataset, cell: &GridCellKey) -> String {
    let date = cell.date().format("%Y-%m-%d");
    let decimals = cell.step().decimals();
    let lat = format!("{:.*}", decimals, cell.lat());
    let lon = format!("{:.*}", decimals, cell.lon());
    format!(
        "{}/{}.csv?{}[({date}):1:({date})][({lat}):1:({lat})][({lon}):1:({lon})]",
        dataset.base_url.trim_end_matches('/'),
        dataset.dataset,
        dataset.variable,
    )
}

#[async_trait]
impl GridSource for HttpGridSource {
    async fn fetch(&self, cell: &GridCellKey) -> FetchOutcome {
        let url = self.query_url(cell);
        log::debug!("GET {url}");

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return FetchOutcome::TransientError(e.to_string()),
        };

        let status = response.status();
        let outcome = match response.text().await {
            Ok(text) => classify(status, Ok(text.as_str()), &self.dataset.variable),
            Err(e) => classify(status, Err(e.to_string()), &self.dataset.variable),
        };
        if matches!(outcome, FetchOutcome::NotAvailable) {
            log::debug!("No data for {cell} (HTTP {status})");
        }
        outcome
    }
}

/// Maps an ERDDAP response to a [`FetchOutcome`].
///
/// 429 and 5xx are retried. Any other 4xx is ERDDAP's way of saying
/// "no matching results" or "out of range", so it is an answer.
fn classify(status: StatusCode, body: Result<&str, String>, variable: &str) -> FetchOutcome {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return FetchOutcome::TransientError(format!("HTTP {status}"));
    }

    let text = match body {
        Ok(text) => text,
        Err(e) => return FetchOutcome::TransientError(e),
    };

    if status.is_client_error() {
        log::debug!("HTTP {status}: {}", preview(text));
        return FetchOutcome::NotAvailable;
    }

    match parse_grid_csv(text, variable) {
        Ok(Some(value)) => FetchOutcome::Value(value),
        Ok(None) => FetchOutcome::NotAvailable,
        Err(e) => FetchOutcome::TransientError(format!("unreadable CSV ({e}): {}", preview(text))),
    }
}

fn preview(text: &str) -> String {
    if text.len() > BODY_PREVIEW_LEN {
        let cut = (0..=BODY_PREVIEW_LEN)
            .rev()
            .find(|i| text.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    } else {
        text.to_string()
    }
}

/// Extracts the first numeric value of `variable` from an ERDDAP CSV body.
///
/// The value column is the first header that starts with `variable`
/// (ERDDAP sometimes appends units, e.g. `sst (degree_C)`). Rows that do
/// not hold a finite number, such as the units row or `NaN` cells, are
/// skipped.
///
/// Returns `Ok(None)` when the column is missing or has no numeric value.
///
/// # Errors
///
/// Returns a [`csv::Error`] if the body is not readable as CSV.
pub fn parse_grid_csv(text: &str, variable: &str) -> Result<Option<f64>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let Some(column) = reader
        .headers()?
        .iter()
        .position(|h| h.starts_with(variable))
    else {
        return Ok(None);
    };

    for record in reader.records() {
        let record = record?;
        let value = record
            .get(column)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite());
        if value.is_some() {
            return Ok(value);
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::find_dataset;
    use crate::{GridStep, normalize_longitude};
    use chrono::NaiveDate;

    #[test]
    fn parses_value_after_units_row() {
        let body = "time,latitude,longitude,sst\n\
                    UTC,degrees_north,degrees_east,degree_C\n\
                    2019-07-16T00:00:00Z,25.73,280.12,29.412\n";
        assert_eq!(parse_grid_csv(body, "sst").unwrap(), Some(29.412));
    }

    #[test]
    fn matches_column_by_prefix() {
        let body = "time,latitude,longitude,sst (degree_C)\n\
                    2019-07-16T00:00:00Z,25.73,280.12,27.5\n";
        assert_eq!(parse_grid_csv(body, "sst").unwrap(), Some(27.5));
    }

    #[test]
    fn nan_and_missing_column_are_no_data() {
        let nan = "time,latitude,longitude,sst\n\
                   UTC,degrees_north,degrees_east,degree_C\n\
                   2019-07-16T00:00:00Z,25.73,280.12,NaN\n";
        assert_eq!(parse_grid_csv(nan, "sst").unwrap(), None);

        let other = "time,latitude,longitude,chlor_a\n2019-07-16,1,2,0.3\n";
        assert_eq!(parse_grid_csv(other, "sst").unwrap(), None);

        assert_eq!(parse_grid_csv("", "sst").unwrap(), None);
    }

    const BODY: &str = "time,latitude,longitude,sst\n\
                        UTC,degrees_north,degrees_east,degree_C\n\
                        2019-07-16T00:00:00Z,25.73,280.12,29.412\n";

    #[test]
    fn ok_response_yields_value() {
        assert!(matches!(
            classify(StatusCode::OK, Ok(BODY), "sst"),
            FetchOutcome::Value(v) if (v - 29.412).abs() < 1e-12
        ));
    }

    #[test]
    fn ok_response_without_number_is_not_available() {
        let nan = BODY.replace("29.412", "NaN");
        assert!(matches!(
            classify(StatusCode::OK, Ok(nan.as_str()), "sst"),
            FetchOutcome::NotAvailable
        ));
    }

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        for code in [429, 500, 502, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(
                matches!(
                    classify(status, Ok("busy"), "sst"),
                    FetchOutcome::TransientError(ref e) if e.contains(&code.to_string())
                ),
                "{code}"
            );
        }
    }

    #[test]
    fn other_client_errors_are_not_available() {
        let body = "Error {\n\
                    code=404;\n\
                    message=\"Not Found: Your query produced no matching results.\";\n\
                    }";
        for code in [400, 404] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(
                matches!(classify(status, Ok(body), "sst"), FetchOutcome::NotAvailable),
                "{code}"
            );
        }
    }

    #[test]
    fn unreadable_body_is_transient() {
        assert!(matches!(
            classify(StatusCode::OK, Err("connection reset".to_string()), "sst"),
            FetchOutcome::TransientError(ref e) if e == "connection reset"
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, Err("connection reset".to_string()), "sst"),
            FetchOutcome::TransientError(_)
        ));
    }

    #[test]
    fn builds_single_cell_query() {
        let dataset = find_dataset("mur_sst").unwrap();
        let cell = GridCellKey::new(
            NaiveDate::from_ymd_opt(2019, 7, 15).unwrap(),
            25.731,
            normalize_longitude(-79.882),
            GridStep::default(),
        );
        let url = query_url(&dataset, &cell);

        assert!(url.starts_with(
            "https://coastwatch.pfeg.noaa.gov/erddap/griddap/jplMURSST41mday_Lon0360.csv?sst"
        ));
        assert!(url.contains("[(2019-07-15):1:(2019-07-15)]"));
        assert!(url.ends_with("[(25.73):1:(25.73)][(280.12):1:(280.12)]"));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(BODY_PREVIEW_LEN);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert!(p.len() <= BODY_PREVIEW_LEN + 3);
    }
}

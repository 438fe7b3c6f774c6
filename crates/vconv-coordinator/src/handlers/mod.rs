//! HTTP request handlers.

pub mod health;
pub mod logs;
pub mod tasks;
pub mod videos;
pub mod workers;

use vconv_models::InvalidCode;

use crate::error::{ApiError, ApiResult};

/// Decode a list of numeric wire codes into their enum variants,
/// rejecting unknown codes as a validation error.
pub(crate) fn parse_codes<T>(codes: &[i16]) -> ApiResult<Vec<T>>
where
    T: TryFrom<i16, Error = InvalidCode>,
{
    codes
        .iter()
        .map(|&code| T::try_from(code).map_err(|e| ApiError::validation(e.to_string())))
        .collect()
}

/// Common paging parameters.
#[derive(Debug, serde::Deserialize, Default)]
pub struct Paging {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl Paging {
    pub fn to_page(&self) -> vconv_store::Page {
        vconv_store::Page::new(self.page, self.page_size)
    }
}

/// Parse an optional `order` query parameter.
pub(crate) fn parse_order(order: Option<&str>) -> ApiResult<vconv_store::SortOrder> {
    match order {
        None => Ok(vconv_store::SortOrder::default()),
        Some(raw) => vconv_store::SortOrder::from_param(raw)
            .ok_or_else(|| ApiError::validation(format!("invalid order '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vconv_models::TaskStatus;

    #[test]
    fn test_parse_codes() {
        let statuses: Vec<TaskStatus> = parse_codes(&[0, 1]).unwrap();
        assert_eq!(statuses, vec![TaskStatus::Created, TaskStatus::Running]);
        assert!(parse_codes::<TaskStatus>(&[9]).is_err());
    }

    #[test]
    fn test_parse_order() {
        assert!(parse_order(Some("asc")).is_ok());
        assert!(parse_order(None).is_ok());
        assert!(parse_order(Some("spiral")).is_err());
    }
}

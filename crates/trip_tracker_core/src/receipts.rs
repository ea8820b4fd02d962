//! crates/trip_tracker_core/src/receipts.rs
//!
//! Receipt capture: form validation and the create-then-upload submission flow.

use chrono::{Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::amounts::{parse_receipt_amount, AmountEntry, AmountMode, ReceiptAmounts};
use crate::controller::{within_timeout, LifecycleSettings};
use crate::domain::{NewReceipt, PhotoRef, ReceiptCategory, ReceiptQuery, ReceiptRecord};
use crate::error::{TripResult, ValidationError};
use crate::ids::generate_receipt_id;
use crate::ports::{PhotoStore, ReceiptStore};
use crate::upload::PhotoUploader;

pub const MAX_VENDOR_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
const RECEIPT_FOLDER: &str = "receipts";

/// The receipt form as the user filled it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptForm {
    pub photo: Option<PhotoRef>,
    pub vendor: String,
    pub category: Option<String>,
    /// `YYYY-MM-DD`
    pub receipt_date: String,
    #[serde(default)]
    pub description: String,
    pub amount_mode: AmountMode,
    pub amount: String,
}

/// A receipt form that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidReceipt {
    pub photo: PhotoRef,
    pub receipt_date: NaiveDate,
    pub category: ReceiptCategory,
    pub vendor: String,
    pub description: Option<String>,
    pub amounts: ReceiptAmounts,
}

impl ValidReceipt {
    pub fn into_new_receipt(self, id: String) -> (NewReceipt, PhotoRef) {
        let receipt = NewReceipt {
            id,
            receipt_date: self.receipt_date,
            category: self.category,
            vendor: self.vendor,
            description: self.description,
            amounts: self.amounts,
        };
        (receipt, self.photo)
    }
}

fn parse_receipt_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let raw = raw.trim();
    if raw.len() != 10 {
        return Err(ValidationError::InvalidDate(raw.to_string()));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(raw.to_string()))
}

impl ReceiptForm {
    /// Checks the form in the order the user sees the fields; the first
    /// problem found is reported.
    pub fn validate(&self, today: NaiveDate) -> Result<ValidReceipt, ValidationError> {
        let photo = self
            .photo
            .clone()
            .ok_or(ValidationError::MissingReceiptPhoto)?;

        let vendor = self.vendor.trim();
        if vendor.is_empty() {
            return Err(ValidationError::VendorRequired);
        }
        if vendor.chars().count() > MAX_VENDOR_LEN {
            return Err(ValidationError::VendorTooLong {
                max: MAX_VENDOR_LEN,
            });
        }

        let category = match self.category.as_deref().map(str::trim) {
            None | Some("") => return Err(ValidationError::CategoryRequired),
            Some(raw) => raw.parse::<ReceiptCategory>()?,
        };

        let receipt_date = parse_receipt_date(&self.receipt_date)?;
        let latest = today
            .checked_add_months(Months::new(12))
            .unwrap_or(NaiveDate::MAX);
        if receipt_date > latest {
            return Err(ValidationError::DateTooFarInFuture);
        }

        let description = self.description.trim();
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::DescriptionTooLong {
                max: MAX_DESCRIPTION_LEN,
            });
        }

        let value = parse_receipt_amount(&self.amount)?;
        let entry = match self.amount_mode {
            AmountMode::Total => AmountEntry::Total(value),
            AmountMode::Subtotal => AmountEntry::Subtotal(value),
        };

        Ok(ValidReceipt {
            photo,
            receipt_date,
            category,
            vendor: vendor.to_string(),
            description: (!description.is_empty()).then(|| description.to_string()),
            amounts: entry.resolve(),
        })
    }
}

/// The result of a submitted receipt. `photo_uploaded` is false when the
/// record was saved but its photo could not be stored or linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSubmission {
    pub record: ReceiptRecord,
    pub photo_uploaded: bool,
}

impl ReceiptSubmission {
    pub fn is_partial(&self) -> bool {
        !self.photo_uploaded
    }
}

#[derive(Clone)]
pub struct ReceiptService {
    store: Arc<dyn ReceiptStore>,
    uploader: PhotoUploader,
    remote_timeout: Duration,
}

impl ReceiptService {
    pub fn new(
        store: Arc<dyn ReceiptStore>,
        photos: Arc<dyn PhotoStore>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            uploader: PhotoUploader::new(photos, settings.upload_timeout),
            remote_timeout: settings.remote_timeout,
        }
    }

    /// Creates the record, then makes a single attempt at storing its photo.
    pub async fn submit(&self, form: ReceiptForm) -> TripResult<ReceiptSubmission> {
        let valid = form.validate(Utc::now().date_naive())?;
        let (receipt, photo) = valid.into_new_receipt(generate_receipt_id());
        let id = receipt.id.clone();

        let mut record = within_timeout(self.remote_timeout, self.store.create(receipt))
            .await
            .map_err(|e| {
                error!(receipt_id = %id, "Failed to create receipt: {}", e);
                e
            })?;

        let photo_uploaded = match self.attach_photo(&id, &photo).await {
            Ok(url) => {
                record.receipt_image_url = Some(url);
                true
            }
            Err(reason) => {
                warn!(receipt_id = %id, "Receipt saved without photo: {}", reason);
                false
            }
        };

        info!(receipt_id = %id, total = %record.total_amount, photo_uploaded, "Receipt saved.");
        Ok(ReceiptSubmission {
            record,
            photo_uploaded,
        })
    }

    async fn attach_photo(&self, id: &str, photo: &PhotoRef) -> Result<String, String> {
        let path = self
            .uploader
            .upload_once(RECEIPT_FOLDER, id, photo)
            .await
            .map_err(|e| e.to_string())?;
        let url = within_timeout(self.remote_timeout, self.uploader.store().url_for(&path))
            .await
            .map_err(|e| e.to_string())?;
        within_timeout(self.remote_timeout, self.store.set_image_url(id, &url))
            .await
            .map_err(|e| e.to_string())?;
        Ok(url)
    }

    pub async fn get(&self, id: &str) -> TripResult<ReceiptRecord> {
        within_timeout(self.remote_timeout, self.store.get(id)).await
    }

    pub async fn query(&self, query: &ReceiptQuery) -> TripResult<Vec<ReceiptRecord>> {
        within_timeout(self.remote_timeout, self.store.query(query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TripError;
    use crate::memory::{InMemoryPhotoStore, InMemoryReceiptStore};
    use crate::ports::PortError;
    use rust_decimal::Decimal;
    use std::io::Write;
    use std::str::FromStr;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn form(photo: Option<PhotoRef>) -> ReceiptForm {
        ReceiptForm {
            photo,
            vendor: "  Shell Coles Express ".to_string(),
            category: Some("fuel".to_string()),
            receipt_date: "2024-06-14".to_string(),
            description: String::new(),
            amount_mode: AmountMode::Total,
            amount: "110".to_string(),
        }
    }

    fn photo() -> PhotoRef {
        PhotoRef::new("/tmp/receipt.jpg")
    }

    #[test]
    fn valid_form_resolves_amounts_and_trims() {
        let valid = form(Some(photo())).validate(today()).unwrap();
        assert_eq!(valid.vendor, "Shell Coles Express");
        assert_eq!(valid.category, ReceiptCategory::Fuel);
        assert_eq!(valid.description, None);
        assert_eq!(valid.amounts.gst, Decimal::from(10));
        assert_eq!(valid.amounts.subtotal, Decimal::from(100));
    }

    #[test]
    fn photo_is_checked_first() {
        let mut f = form(None);
        f.vendor = String::new();
        assert_eq!(f.validate(today()), Err(ValidationError::MissingReceiptPhoto));
    }

    #[test]
    fn field_rules() {
        let mut f = form(Some(photo()));
        f.vendor = "x".repeat(101);
        assert!(matches!(
            f.validate(today()),
            Err(ValidationError::VendorTooLong { max: 100 })
        ));

        let mut f = form(Some(photo()));
        f.category = None;
        assert_eq!(f.validate(today()), Err(ValidationError::CategoryRequired));

        let mut f = form(Some(photo()));
        f.receipt_date = "14/06/2024".to_string();
        assert!(matches!(
            f.validate(today()),
            Err(ValidationError::InvalidDate(_))
        ));

        let mut f = form(Some(photo()));
        f.receipt_date = "2025-06-16".to_string();
        assert_eq!(f.validate(today()), Err(ValidationError::DateTooFarInFuture));

        let mut f = form(Some(photo()));
        f.receipt_date = "2025-06-15".to_string();
        assert!(f.validate(today()).is_ok());

        let mut f = form(Some(photo()));
        f.description = "d".repeat(501);
        assert!(matches!(
            f.validate(today()),
            Err(ValidationError::DescriptionTooLong { .. })
        ));

        let mut f = form(Some(photo()));
        f.amount = "0".to_string();
        assert_eq!(f.validate(today()), Err(ValidationError::AmountRequired));
    }

    #[test]
    fn subtotal_mode_adds_gst() {
        let mut f = form(Some(photo()));
        f.amount_mode = AmountMode::Subtotal;
        f.amount = "50".to_string();
        let valid = f.validate(today()).unwrap();
        assert_eq!(valid.amounts.total, Decimal::from_str("55.00").unwrap());
    }

    fn service(
        store: Arc<InMemoryReceiptStore>,
        photos: Arc<InMemoryPhotoStore>,
    ) -> ReceiptService {
        ReceiptService::new(
            store,
            photos,
            LifecycleSettings {
                remote_timeout: Duration::from_millis(200),
                upload_timeout: Duration::from_millis(200),
            },
        )
    }

    fn dated_form(photo: PhotoRef) -> ReceiptForm {
        ReceiptForm {
            receipt_date: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
            ..form(Some(photo))
        }
    }

    #[tokio::test]
    async fn submit_links_the_uploaded_photo() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"png").unwrap();
        let store = Arc::new(InMemoryReceiptStore::new());
        let photos = Arc::new(InMemoryPhotoStore::new());

        let submission = service(store.clone(), photos.clone())
            .submit(dated_form(PhotoRef::new(file.path())))
            .await
            .unwrap();

        assert!(submission.photo_uploaded);
        assert!(submission.record.id.starts_with("receipt_"));
        let path = &photos.paths()[0];
        assert!(path.starts_with(&format!("receipts/{}_", submission.record.id)));
        assert_eq!(
            store.receipts()[0].receipt_image_url,
            submission.record.receipt_image_url
        );
    }

    #[tokio::test]
    async fn failed_photo_is_a_partial_success() {
        let mut file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
        file.write_all(b"jpg").unwrap();
        let store = Arc::new(InMemoryReceiptStore::new());
        let photos = Arc::new(InMemoryPhotoStore::new());
        photos.fail_next(1);

        let submission = service(store.clone(), photos)
            .submit(dated_form(PhotoRef::new(file.path())))
            .await
            .unwrap();

        assert!(submission.is_partial());
        assert_eq!(store.receipts().len(), 1);
        assert_eq!(store.receipts()[0].receipt_image_url, None);
    }

    #[tokio::test]
    async fn create_failure_is_returned_and_nothing_is_uploaded() {
        let store = Arc::new(InMemoryReceiptStore::new());
        store.fail_next_with(PortError::Unavailable("offline".to_string()));
        let photos = Arc::new(InMemoryPhotoStore::new());

        let err = service(store, photos.clone())
            .submit(dated_form(photo()))
            .await
            .unwrap_err();
        assert!(matches!(err, TripError::Remote(_)));
        assert!(photos.paths().is_empty());
    }
}

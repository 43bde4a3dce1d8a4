use super::store::InvoiceStore;
use crate::models::{Category, CategoryInput, CategorySummary};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

/// Admin-managed invoice categories. Names are unique; a category in use
/// cannot be deleted.
#[derive(Clone)]
pub struct CategoryService {
    store: Arc<dyn InvoiceStore>,
}

impl CategoryService {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<CategorySummary>, AppError> {
        self.store.list_categories().await
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: CategoryInput) -> Result<Category, AppError> {
        let input = input.normalized();
        input.validate()?;
        let category = self.store.insert_category(&input).await?;
        tracing::info!(category_id = %category.id, "Category created");
        Ok(category)
    }

    #[instrument(skip(self, input), fields(category_id = %id))]
    pub async fn update(&self, id: Uuid, input: CategoryInput) -> Result<Category, AppError> {
        let input = input.normalized();
        input.validate()?;
        self.store.update_category(id, &input).await
    }

    #[instrument(skip(self), fields(category_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.store.delete_category(id).await?;
        tracing::info!(category_id = %id, "Category deleted");
        Ok(())
    }
}

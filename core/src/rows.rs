//! Row queries against the blog's managed database.
//!
//! Pages only need "given a query, give me ordered rows or an error". The
//! query description is rendered as REST-style parameters
//! (`select=a,b`, `col=eq.value`, `order=col.desc`, `limit=n`) and served by
//! `GET /rows/{table}`.

use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::client::{ApiClient, RequestOptions};
use crate::error::ApiError;

/// One database row as a JSON object.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    fn as_str(self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    columns: Vec<String>,
    filters: Vec<(String, String)>,
    order: Option<(String, Order)>,
    limit: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters.push((column.to_string(), value.to_string()));
        self
    }

    pub fn order_by(mut self, column: &str, order: Order) -> Self {
        self.order = Some((column.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn path(&self) -> String {
        let table: String = form_urlencoded::byte_serialize(self.table.as_bytes()).collect();
        format!("/rows/{table}")
    }

    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.columns.is_empty() {
            params.push(("select".to_string(), self.columns.join(",")));
        }
        for (column, value) in &self.filters {
            params.push((column.clone(), format!("eq.{value}")));
        }
        if let Some((column, order)) = &self.order {
            params.push(("order".to_string(), format!("{column}.{}", order.as_str())));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

pub trait RowSource {
    fn fetch_rows(&self, query: &Query) -> Result<Vec<Row>, ApiError>;
}

/// Row source that reads through the API client.
#[derive(Debug, Clone)]
pub struct HttpRowSource {
    client: ApiClient,
}

impl HttpRowSource {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

impl RowSource for HttpRowSource {
    fn fetch_rows(&self, query: &Query) -> Result<Vec<Row>, ApiError> {
        let mut options = RequestOptions::new();
        options.query = query.to_params();
        let rows = self.client.get::<Vec<Row>>(&query.path(), options)?;
        Ok(rows.data)
    }
}

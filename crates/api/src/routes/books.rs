//! Book catalog endpoints.
//!
//! Writes are published to the bus and acknowledged with `202 Accepted`;
//! the Book workflow applies them asynchronously.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use library::{Book, LibraryMessage, MemberId};
use saga_engine::{SagaInstance, SagaStore};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct AddBookRequest {
    pub book_id: Option<String>,
    pub isbn: String,
    pub title: String,
}

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub member_id: String,
}

#[derive(Serialize)]
pub struct BookAccepted {
    pub book_id: String,
}

#[derive(Serialize)]
pub struct BookResponse {
    pub id: String,
    pub state: String,
    pub title: String,
    pub isbn: String,
    pub date_added: Option<NaiveDate>,
    pub version: i64,
}

impl From<SagaInstance<Book>> for BookResponse {
    fn from(book: SagaInstance<Book>) -> Self {
        Self {
            id: book.correlation_id.to_string(),
            state: book.state.to_string(),
            title: book.data.title,
            isbn: book.data.isbn,
            date_added: book.data.date_added,
            version: book.version.as_i64(),
        }
    }
}

/// POST /books: add a book to the catalog.
#[tracing::instrument(skip(state, req))]
pub async fn add<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<AddBookRequest>,
) -> Result<(StatusCode, Json<BookAccepted>), ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    let book_id = match req.book_id.as_deref() {
        Some(id) => parse_id("book_id", id)?,
        None => common::CorrelationId::new(),
    };

    let message = LibraryMessage::book_added(book_id, req.isbn, req.title, state.clock.now());
    state.publish(message).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(BookAccepted {
            book_id: book_id.to_string(),
        }),
    ))
}

/// GET /books/:id: current state of a book.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<BookResponse>, ApiError> {
    let book_id = parse_id("book id", &id)?;
    let book = state
        .library
        .book(book_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Book {id} not found")))?;

    Ok(Json(book.into()))
}

/// POST /books/:id/checkout: record that a member took the book out.
#[tracing::instrument(skip(state, req))]
pub async fn checkout<S: SagaStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CheckoutRequest>,
) -> Result<StatusCode, ApiError> {
    let book_id = parse_id("book id", &id)?;
    let member_id = MemberId::from_uuid(parse_id("member_id", &req.member_id)?.as_uuid());

    let message = LibraryMessage::book_checked_out(book_id, member_id, state.clock.now());
    state.publish(message).await?;

    Ok(StatusCode::ACCEPTED)
}

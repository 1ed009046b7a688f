use axum::extract::FromRequest;

use crate::errors::AppError;

/// `axum::Json` whose rejections render as [`AppError`] JSON bodies.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

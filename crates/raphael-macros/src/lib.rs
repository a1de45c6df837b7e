//! Procedural macros for Raphael.
//!
//! `#[derive(Model)]` implements `raphael_core::Model` for a plain struct:
//!
//! ```ignore
//! #[derive(Model, Debug, Default, Clone)]
//! #[raphael(app_label = "books")]
//! struct Book {
//!     #[raphael(primary_key)]
//!     id: Option<i64>,
//!     #[raphael(max_length = 200)]
//!     title: String,
//!     #[raphael(kind = "datetime", auto_now_add)]
//!     created_at: Option<i64>,
//!     #[raphael(skip)]
//!     scratch: Vec<u8>,
//! }
//! ```
//!
//! Struct attributes: `app_label` (required), `name`, `table`.
//! Field attributes: `primary_key`, `kind`, `max_length`, `max_digits`,
//! `decimal_places`, `null`, `default`, `auto_now`, `auto_now_add`, `skip`.
//! Without `kind`, the kind is inferred from the Rust type; `Option<T>`
//! fields are nullable.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod model_derive;

/// Derive `raphael_core::Model`.
#[proc_macro_derive(Model, attributes(raphael))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match model_derive::parse_model(&input) {
        Ok(def) => model_derive::generate_model_impl(&def).into(),
        Err(err) => err.to_compile_error().into(),
    }
}

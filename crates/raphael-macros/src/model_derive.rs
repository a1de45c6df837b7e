//! Implementation of the Model derive macro.
//!
//! Reads `#[raphael(...)]` attributes on the struct and its fields and
//! generates an implementation of `raphael_core::Model`.

use proc_macro2::{Span, TokenStream};
use quote::{ToTokens, quote};
use syn::{
    Data, DeriveInput, Error, Field, Fields, GenericArgument, Ident, Lit, LitStr, PathArguments,
    Result, Type,
};

use raphael_core::FieldKind;

/// Parsed model definition.
#[derive(Debug)]
pub struct ModelDef {
    pub name: Ident,
    pub app_label: String,
    pub model_name: String,
    pub table: Option<String>,
    pub fields: Vec<ModelFieldDef>,
}

/// Parsed attributes of one persisted field.
#[derive(Debug)]
pub struct ModelFieldDef {
    pub name: Ident,
    pub ty: Type,
    pub kind: FieldKind,
    pub primary_key: bool,
    pub nullable: bool,
    pub max_length: Option<u32>,
    pub max_digits: Option<u8>,
    pub decimal_places: Option<u8>,
    pub default: Option<Lit>,
    pub auto_now: bool,
    pub auto_now_add: bool,
}

/// Parse a `DeriveInput` into a `ModelDef`.
pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Model cannot be derived for generic structs",
        ));
    }

    let name = input.ident.clone();
    let mut app_label = None;
    let mut model_name = None;
    let mut table = None;

    for attr in &input.attrs {
        if !attr.path().is_ident("raphael") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let value: LitStr = meta.value()?.parse()?;
            if meta.path.is_ident("app_label") {
                app_label = Some(value.value());
            } else if meta.path.is_ident("name") {
                model_name = Some(value.value().to_lowercase());
            } else if meta.path.is_ident("table") {
                table = Some(value.value());
            } else {
                let attr_name = meta.path.to_token_stream().to_string();
                return Err(Error::new_spanned(
                    &meta.path,
                    format!(
                        "unknown model attribute `{attr_name}`. \
                         Valid attributes are: app_label, name, table"
                    ),
                ));
            }
            Ok(())
        })?;
    }

    let app_label = app_label.ok_or_else(|| {
        Error::new_spanned(
            &input.ident,
            "missing `#[raphael(app_label = \"...\")]` on model struct",
        )
    })?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not unions",
            ));
        }
    };

    let primary_keys = fields.iter().filter(|f| f.primary_key).count();
    if primary_keys > 1 {
        return Err(Error::new_spanned(
            &input.ident,
            "at most one field may be marked `primary_key`",
        ));
    }

    Ok(ModelDef {
        model_name: model_name.unwrap_or_else(|| name.to_string().to_lowercase()),
        name,
        app_label,
        table,
        fields,
    })
}

fn parse_fields(fields: &Fields) -> Result<Vec<ModelFieldDef>> {
    match fields {
        Fields::Named(named) => {
            let mut out = Vec::new();
            for field in &named.named {
                if let Some(def) = parse_field(field)? {
                    out.push(def);
                }
            }
            Ok(out)
        }
        Fields::Unnamed(_) => Err(Error::new_spanned(
            fields,
            "Model requires a struct with named fields",
        )),
        Fields::Unit => Ok(Vec::new()),
    }
}

/// Parse one field. Returns `None` for `#[raphael(skip)]`.
fn parse_field(field: &Field) -> Result<Option<ModelFieldDef>> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;

    let mut skip = false;
    let mut primary_key = false;
    let mut null = false;
    let mut kind_name: Option<LitStr> = None;
    let mut max_length = None;
    let mut max_digits = None;
    let mut decimal_places = None;
    let mut default = None;
    let mut auto_now = false;
    let mut auto_now_add = false;

    for attr in &field.attrs {
        if !attr.path().is_ident("raphael") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            let path = &meta.path;

            if path.is_ident("skip") {
                skip = true;
            } else if path.is_ident("primary_key") {
                primary_key = true;
            } else if path.is_ident("null") {
                null = true;
            } else if path.is_ident("auto_now") {
                auto_now = true;
            } else if path.is_ident("auto_now_add") {
                auto_now_add = true;
            } else if path.is_ident("kind") {
                kind_name = Some(meta.value()?.parse()?);
            } else if path.is_ident("max_length") {
                let value: Lit = meta.value()?.parse()?;
                max_length = Some(parse_int_lit::<u32>(&value)?);
            } else if path.is_ident("max_digits") {
                let value: Lit = meta.value()?.parse()?;
                max_digits = Some(parse_int_lit::<u8>(&value)?);
            } else if path.is_ident("decimal_places") {
                let value: Lit = meta.value()?.parse()?;
                decimal_places = Some(parse_int_lit::<u8>(&value)?);
            } else if path.is_ident("default") {
                let value: Lit = meta.value()?.parse()?;
                match value {
                    Lit::Bool(_) | Lit::Int(_) | Lit::Float(_) | Lit::Str(_) => {
                        default = Some(value);
                    }
                    other => {
                        return Err(Error::new_spanned(
                            other,
                            "default must be a bool, integer, float or string literal",
                        ));
                    }
                }
            } else {
                let attr_name = path.to_token_stream().to_string();
                return Err(Error::new_spanned(
                    path,
                    format!(
                        "unknown field attribute `{attr_name}`. \
                         Valid attributes are: skip, primary_key, kind, max_length, \
                         max_digits, decimal_places, null, default, auto_now, auto_now_add"
                    ),
                ));
            }

            Ok(())
        })?;
    }

    if skip {
        return Ok(None);
    }

    let ty = field.ty.clone();
    let is_optional = is_option_type(&ty);

    let kind = match &kind_name {
        Some(lit) => FieldKind::from_name(&lit.value()).ok_or_else(|| {
            Error::new_spanned(lit, format!("unknown field kind {:?}", lit.value()))
        })?,
        None => infer_kind(&ty, primary_key, max_length.is_some()).ok_or_else(|| {
            Error::new_spanned(
                &field.ty,
                "cannot infer the field kind from this type; add `#[raphael(kind = \"...\")]`",
            )
        })?,
    };

    Ok(Some(ModelFieldDef {
        name,
        ty,
        kind,
        primary_key,
        // An optional key only means "not yet saved".
        nullable: null || (is_optional && !primary_key),
        max_length,
        max_digits,
        decimal_places,
        default,
        auto_now,
        auto_now_add,
    }))
}

/// Infer a kind from the Rust type (looking through `Option`).
fn infer_kind(ty: &Type, primary_key: bool, has_max_length: bool) -> Option<FieldKind> {
    let inner = extract_option_inner(ty).unwrap_or(ty);
    let kind = match type_name(inner)?.as_str() {
        "bool" => FieldKind::Boolean,
        "i16" if primary_key => FieldKind::SmallAuto,
        "i32" if primary_key => FieldKind::Auto,
        "i64" if primary_key => FieldKind::BigAuto,
        "i16" => FieldKind::SmallInteger,
        "i32" | "u16" => FieldKind::Integer,
        "i64" | "u32" => FieldKind::BigInteger,
        "f32" | "f64" => FieldKind::Float,
        "String" if has_max_length => FieldKind::Char,
        "String" => FieldKind::Text,
        "Vec<u8>" => FieldKind::Binary,
        "[u8; 16]" => FieldKind::Uuid,
        "Value" | "serde_json::Value" => FieldKind::Json,
        _ => return None,
    };
    Some(kind)
}

/// Normalized textual form of a type, e.g. `Vec<u8>` or `[u8; 16]`.
fn type_name(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(_) | Type::Array(_) => Some(
            ty.to_token_stream()
                .to_string()
                .replace(" < ", "<")
                .replace(" >", ">")
                .replace(" :: ", "::")
                .replace(" ;", ";"),
        ),
        _ => None,
    }
}

/// Check if a type is `Option<T>`.
fn is_option_type(ty: &Type) -> bool {
    extract_option_inner(ty).is_some()
}

/// Extract the inner type from `Option<T>`.
fn extract_option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first() {
        Some(GenericArgument::Type(inner)) => Some(inner),
        _ => None,
    }
}

fn parse_int_lit<T>(lit: &Lit) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lit {
        Lit::Int(int_lit) => int_lit
            .base10_parse::<T>()
            .map_err(|e| Error::new_spanned(lit, format!("invalid integer: {e}"))),
        _ => Err(Error::new_spanned(lit, "expected integer literal")),
    }
}

/// Generate the `Model` trait implementation.
pub fn generate_model_impl(def: &ModelDef) -> TokenStream {
    let name = &def.name;
    let type_name = name.to_string();
    let app_label = &def.app_label;
    let model_name = &def.model_name;

    let db_table = def.table.as_ref().map(|table| {
        quote! {
            const DB_TABLE: ::core::option::Option<&'static str> = ::core::option::Option::Some(#table);
        }
    });

    let descriptors: Vec<TokenStream> = def.fields.iter().map(generate_descriptor).collect();

    let getters = def.fields.iter().enumerate().map(|(idx, field)| {
        let ident = &field.name;
        let column = ident.to_string();
        quote! {
            #column => ::core::option::Option::Some(
                <Self as ::raphael_core::Model>::fields()[#idx]
                    .coerce(::raphael_core::Value::from(::core::clone::Clone::clone(&self.#ident))),
            ),
        }
    });

    let setters = def.fields.iter().map(|field| {
        let ident = &field.name;
        let ty = &field.ty;
        let column = ident.to_string();
        quote! {
            #column => {
                self.#ident = <#ty as ::raphael_core::FromValue>::from_value(value).map_err(|e| {
                    ::raphael_core::Error::Conversion(::std::format!("{}.{}: {}", #type_name, #column, e))
                })?;
                ::core::result::Result::Ok(())
            }
        }
    });

    quote! {
        impl ::raphael_core::Model for #name {
            const APP_LABEL: &'static str = #app_label;
            const MODEL_NAME: &'static str = #model_name;
            const TYPE_NAME: &'static str = #type_name;
            #db_table

            fn fields() -> &'static [::raphael_core::FieldDescriptor] {
                const FIELDS: &[::raphael_core::FieldDescriptor] = &[#(#descriptors),*];
                FIELDS
            }

            fn field_value(&self, name: &str) -> ::core::option::Option<::raphael_core::Value> {
                match name {
                    #(#getters)*
                    _ => ::core::option::Option::None,
                }
            }

            fn set_field_value(
                &mut self,
                name: &str,
                value: ::raphael_core::Value,
            ) -> ::raphael_core::Result<()> {
                match name {
                    #(#setters)*
                    _ => ::core::result::Result::Err(::raphael_core::Error::Conversion(
                        ::std::format!("{} has no field {:?}", #type_name, name),
                    )),
                }
            }
        }
    }
}

fn generate_descriptor(field: &ModelFieldDef) -> TokenStream {
    let column = field.name.to_string();
    let kind = Ident::new(&format!("{:?}", field.kind), Span::call_site());
    let primary_key = field.primary_key;
    let nullable = field.nullable;
    let auto_now = field.auto_now;
    let auto_now_add = field.auto_now_add;
    let max_length = option_tokens(field.max_length);
    let max_digits = option_tokens(field.max_digits);
    let decimal_places = option_tokens(field.decimal_places);
    let default = match &field.default {
        Some(Lit::Bool(b)) => quote! { ::core::option::Option::Some(::raphael_core::FieldDefault::Bool(#b)) },
        Some(Lit::Int(i)) => quote! { ::core::option::Option::Some(::raphael_core::FieldDefault::Int(#i)) },
        Some(Lit::Float(f)) => quote! { ::core::option::Option::Some(::raphael_core::FieldDefault::Float(#f)) },
        Some(Lit::Str(s)) => quote! { ::core::option::Option::Some(::raphael_core::FieldDefault::Str(#s)) },
        _ => quote! { ::core::option::Option::None },
    };

    quote! {
        ::raphael_core::FieldDescriptor::new(#column, ::raphael_core::FieldKind::#kind)
            .primary_key(#primary_key)
            .nullable(#nullable)
            .max_length_opt(#max_length)
            .decimal_opt(#max_digits, #decimal_places)
            .default_opt(#default)
            .auto_now(#auto_now)
            .auto_now_add(#auto_now_add)
    }
}

fn option_tokens<T: ToTokens>(value: Option<T>) -> TokenStream {
    match value {
        Some(v) => quote! { ::core::option::Option::Some(#v) },
        None => quote! { ::core::option::Option::None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_is_option_type() {
        let ty: Type = parse_quote!(Option<String>);
        assert!(is_option_type(&ty));

        let ty: Type = parse_quote!(String);
        assert!(!is_option_type(&ty));
    }

    #[test]
    fn test_infer_kind() {
        let ty: Type = parse_quote!(Option<i64>);
        assert_eq!(infer_kind(&ty, true, false), Some(FieldKind::BigAuto));
        let ty: Type = parse_quote!(i32);
        assert_eq!(infer_kind(&ty, false, false), Some(FieldKind::Integer));
        let ty: Type = parse_quote!(String);
        assert_eq!(infer_kind(&ty, false, true), Some(FieldKind::Char));
        assert_eq!(infer_kind(&ty, false, false), Some(FieldKind::Text));
        let ty: Type = parse_quote!(Vec<u8>);
        assert_eq!(infer_kind(&ty, false, false), Some(FieldKind::Binary));
        let ty: Type = parse_quote!([u8; 16]);
        assert_eq!(infer_kind(&ty, false, false), Some(FieldKind::Uuid));
        let ty: Type = parse_quote!(serde_json::Value);
        assert_eq!(infer_kind(&ty, false, false), Some(FieldKind::Json));
        let ty: Type = parse_quote!(std::time::Duration);
        assert_eq!(infer_kind(&ty, false, false), None);
    }

    #[test]
    fn test_parse_model() {
        let input: DeriveInput = parse_quote! {
            #[raphael(app_label = "books", table = "library")]
            struct Book {
                #[raphael(primary_key)]
                id: Option<i64>,
                #[raphael(max_length = 200)]
                title: String,
                subtitle: Option<String>,
                #[raphael(kind = "decimal", max_digits = 6, decimal_places = 2)]
                price: String,
                #[raphael(skip)]
                cache: Vec<u8>,
            }
        };
        let def = parse_model(&input).unwrap();
        assert_eq!(def.app_label, "books");
        assert_eq!(def.model_name, "book");
        assert_eq!(def.table.as_deref(), Some("library"));
        assert_eq!(def.fields.len(), 4);

        let id = &def.fields[0];
        assert!(id.primary_key && !id.nullable);
        assert_eq!(id.kind, FieldKind::BigAuto);

        assert_eq!(def.fields[1].max_length, Some(200));
        assert!(def.fields[2].nullable);
        assert_eq!(def.fields[3].kind, FieldKind::Decimal);
        assert_eq!(def.fields[3].decimal_places, Some(2));
    }

    #[test]
    fn test_parse_model_requires_app_label() {
        let input: DeriveInput = parse_quote! {
            struct Book {
                title: String,
            }
        };
        assert!(parse_model(&input).is_err());
    }

    #[test]
    fn test_parse_model_rejects_unknown_kind() {
        let input: DeriveInput = parse_quote! {
            #[raphael(app_label = "geo")]
            struct Place {
                #[raphael(kind = "geometry")]
                shape: Vec<u8>,
            }
        };
        assert!(parse_model(&input).is_err());
    }

    #[test]
    fn test_generated_impl_mentions_fields() {
        let input: DeriveInput = parse_quote! {
            #[raphael(app_label = "books")]
            struct Book {
                #[raphael(primary_key)]
                id: Option<i64>,
                #[raphael(default = true)]
                in_print: bool,
            }
        };
        let def = parse_model(&input).unwrap();
        let tokens = generate_model_impl(&def).to_string();
        assert!(tokens.contains("BigAuto"));
        assert!(tokens.contains("FieldDefault"));
        assert!(tokens.contains("\"in_print\""));
    }
}

//! Procedural macros for the doctrail project.
//!
//! This crate provides `#[derive(Document)]`, which implements the document contract
//! (and, unless told otherwise, the serde decode path) for a struct with named fields.
//! Generated code refers to items through `::doctrail`, so the derive is used through the
//! `doctrail` crate rather than directly.

#[allow(unused_extern_crates)]
extern crate self as doctrail_macros;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Data, DeriveInput, Expr, ExprPath, Field, Fields, GenericArgument, LitStr, PathArguments,
    Type, parse_macro_input, spanned::Spanned,
};

/// Derives `doctrail::document::Document`.
///
/// # Attributes
///
/// On the struct:
///
/// - `#[document(collection = "name")]` (required) - the collection the type lives in
/// - `#[document(validate = "path::to::fn")]` - `fn(&Self) -> Result<(), ValidationError>`
/// - `#[document(indexes = "path::to::fn")]` - `fn() -> Vec<IndexSpec>`
/// - `#[document(custom_decode)]` - skip the generated `DecodeDocument` impl so the type
///   can provide its own raw decoder
///
/// On a field:
///
/// - `#[document(id)]` - the identity field. Without it, the field named `id` is used.
///   The field may be `Option<T>` or a plain `T`; either way `T` must round-trip
///   through `bson::Bson`.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize, Document)]
/// #[document(collection = "users", indexes = "User::indexes")]
/// pub struct User {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     pub id: Option<ObjectId>,
///     pub email: String,
/// }
/// ```
#[proc_macro_derive(Document, attributes(document))]
pub fn derive_document(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[derive(Default)]
struct ContainerArgs {
    collection: Option<LitStr>,
    validate: Option<ExprPath>,
    indexes: Option<ExprPath>,
    custom_decode: bool,
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let args = container_args(&input)?;
    let collection = args.collection.ok_or_else(|| {
        syn::Error::new(
            input.ident.span(),
            "missing #[document(collection = \"...\")] attribute",
        )
    })?;
    if collection.value().is_empty() {
        return Err(syn::Error::new(collection.span(), "collection name must not be empty"));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new(
                    input.ident.span(),
                    "Document can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.ident.span(),
                "Document can only be derived for structs",
            ));
        }
    };

    let id_field = identity_field(fields.iter(), &input)?;
    let id_ident = &id_field.ident;

    let (id_body, set_id_body) = if option_inner(&id_field.ty).is_some() {
        (
            quote! {
                self.#id_ident
                    .as_ref()
                    .and_then(|id| ::doctrail::bson::serialize_to_bson(id).ok())
            },
            quote! {
                self.#id_ident = ::core::option::Option::Some(::doctrail::bson::deserialize_from_bson(id)?);
            },
        )
    } else {
        (
            quote! {
                ::doctrail::bson::serialize_to_bson(&self.#id_ident)
                    .ok()
                    .filter(|id| !matches!(id, ::doctrail::bson::Bson::Null))
            },
            quote! {
                self.#id_ident = ::doctrail::bson::deserialize_from_bson(id)?;
            },
        )
    };

    let validate = args.validate.map(|path| {
        quote! {
            fn validate(&self) -> ::core::result::Result<(), ::doctrail::error::ValidationError> {
                #path(self)
            }
        }
    });
    let indexes = args.indexes.map(|path| {
        quote! {
            fn indexes() -> ::std::vec::Vec<::doctrail::index::IndexSpec> {
                #path()
            }
        }
    });

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let decode = (!args.custom_decode).then(|| {
        quote! {
            impl #impl_generics ::doctrail::decode::DecodeDocument for #name #ty_generics #where_clause {}
        }
    });

    Ok(quote! {
        impl #impl_generics ::doctrail::document::Document for #name #ty_generics #where_clause {
            fn collection_name() -> &'static str {
                #collection
            }

            fn id(&self) -> ::core::option::Option<::doctrail::bson::Bson> {
                #id_body
            }

            fn set_id(
                &mut self,
                id: ::doctrail::bson::Bson,
            ) -> ::doctrail::error::DocumentStoreResult<()> {
                #set_id_body
                ::core::result::Result::Ok(())
            }

            #validate
            #indexes
        }

        #decode
    })
}

fn container_args(input: &DeriveInput) -> syn::Result<ContainerArgs> {
    let mut args = ContainerArgs::default();

    for attr in input.attrs.iter().filter(|attr| attr.path().is_ident("document")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                args.collection = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("validate") {
                args.validate = Some(parse_path(&meta.value()?.parse()?)?);
            } else if meta.path.is_ident("indexes") {
                args.indexes = Some(parse_path(&meta.value()?.parse()?)?);
            } else if meta.path.is_ident("custom_decode") {
                args.custom_decode = true;
            } else {
                return Err(meta.error("unknown document attribute"));
            }
            Ok(())
        })?;
    }

    Ok(args)
}

fn parse_path(literal: &LitStr) -> syn::Result<ExprPath> {
    match literal.parse::<Expr>()? {
        Expr::Path(path) => Ok(path),
        other => Err(syn::Error::new(other.span(), "expected a function path")),
    }
}

fn identity_field<'a>(
    mut fields: impl Iterator<Item = &'a Field> + Clone,
    input: &DeriveInput,
) -> syn::Result<&'a Field> {
    let mut marked = None;
    for field in fields.clone() {
        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("document")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    if marked.is_some() {
                        return Err(meta.error("only one field can be marked #[document(id)]"));
                    }
                    marked = Some(field);
                    Ok(())
                } else {
                    Err(meta.error("unknown document field attribute"))
                }
            })?;
        }
    }

    if let Some(field) = marked {
        return Ok(field);
    }

    fields
        .find(|field| field.ident.as_ref().is_some_and(|ident| ident == "id"))
        .ok_or_else(|| {
            syn::Error::new(
                input.ident.span(),
                "no identity field: add a field named `id` or mark one with #[document(id)]",
            )
        })
}

/// Returns `T` when `ty` is spelled `Option<T>`.
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }

    match &segment.arguments {
        PathArguments::AngleBracketed(args) => args.args.iter().find_map(|arg| match arg {
            GenericArgument::Type(inner) => Some(inner),
            _ => None,
        }),
        _ => None,
    }
}

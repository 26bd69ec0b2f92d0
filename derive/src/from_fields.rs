use std::collections::BTreeMap;

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Data, DeriveInput, Error, ExprClosure, Field, Fields, GenericArgument, Ident, LitInt, Pat,
    PathArguments, Result, Token, Type,
    parse::{Parse, ParseStream},
    spanned::Spanned,
};

pub(crate) fn expand_from_fields(input: &DeriveInput) -> Result<TokenStream> {
    let Data::Struct(data) = &input.data else {
        Err(Error::new(
            input.span(),
            "`FromFields` may only be derived on structs.",
        ))?
    };

    let Fields::Named(fields) = &data.fields else {
        Err(Error::new(
            input.span(),
            "`FromFields` may only be derived on structs with named fields.",
        ))?
    };

    let fields = fields
        .named
        .iter()
        .map(FieldMetadata::parse)
        .map(Result::transpose)
        .flatten() // Skip fields without an attribute.
        .collect::<Result<Vec<_>>>()?;

    // Keyed by position so the generated arms come out in record order.
    let mut cases: BTreeMap<usize, FieldMetadata> = BTreeMap::new();

    for field in fields {
        let index = field.index.base10_parse::<usize>()?;
        let span = field.index.span();

        if cases.insert(index, field).is_some() {
            Err(Error::new(span, "Field positions must be unique."))?
        }
    }

    let cases = cases.into_values().map(|field| {
        let FieldMetadata {
            name,
            ty,
            index,
            handler,
        } = field;

        let assignment = if let Some(handler) = handler {
            let body = handler.body;
            // Parameter types are supplied here, so any annotations are dropped.
            let mut inputs = handler.inputs.iter().map(|p| match p {
                Pat::Type(pat_type) => &*pat_type.pat,
                p => p,
            });
            let acc = inputs.next();
            let val = inputs.next();

            quote! {
                (|#acc: &mut #ty, #val: &str| {#body})(&mut self.#name, value)
            }
        } else {
            quote! {
                self.#name = Some(
                    <Self as ::glucometer::sans::fields::FromFields>::parse_field(#index, value)?
                )
            }
        };

        quote! { #index => { #assignment } }
    });

    let name = &input.ident;

    let expanded = quote! {
        impl ::glucometer::sans::fields::FromFields for #name {
            fn add_field(
                &mut self,
                index: usize,
                value: &str,
            ) -> ::core::result::Result<(), ::glucometer::sans::fields::FieldError> {
                match index {
                    #(#cases)*
                    _ => {}
                };

                Ok(())
            }
        }
    };

    Ok(expanded.into())
}

struct FieldMetadata {
    name: Ident,
    ty: Type,
    index: LitInt,
    handler: Option<ExprClosure>,
}

impl FieldMetadata {
    fn parse(field: &Field) -> Result<Option<Self>> {
        let Some(attr) = field.attrs.iter().find(|a| a.path().is_ident("field")) else {
            return Ok(None);
        };

        let Some(name) = field.ident.clone() else {
            Err(Error::new_spanned(field, "Field must be named."))?
        };

        let FieldAttribute { index, handler } = attr.meta.require_list()?.parse_args()?;

        if let Some(handler) = &handler {
            if handler.inputs.len() != 2 {
                Err(Error::new_spanned(
                    handler,
                    "Handler closure must have two parameters.",
                ))?
            }
        } else {
            require_option(&field.ty)?;
        }

        Ok(Some(Self {
            name,
            ty: field.ty.clone(),
            index,
            handler,
        }))
    }
}

/// Fields parsed with `FromStr` are stored as `Option<T>`, left `None` when
/// the record is too short to carry them.
fn require_option(ty: &Type) -> Result<()> {
    let Type::Path(path) = ty else {
        Err(Error::new_spanned(ty, "Field must have a type annotation."))?
    };

    let Some(segment) = path.path.segments.last() else {
        Err(Error::new_spanned(
            &path.path.segments,
            "Field must have a type annotation.",
        ))?
    };

    if segment.ident != "Option" {
        Err(Error::new_spanned(
            &segment.ident,
            "Field without a handler must have type `Option<T>`.",
        ))?
    }

    let PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        Err(Error::new_spanned(
            &segment.arguments,
            "Field of type `Option<T>` must have a generic parameter.",
        ))?
    };

    let Some(GenericArgument::Type(_)) = arguments.args.first() else {
        Err(Error::new_spanned(
            &arguments.args,
            "Generic argument of a field of type `Option<T>` must be a type.",
        ))?
    };

    Ok(())
}

struct FieldAttribute {
    index: LitInt,
    handler: Option<ExprClosure>,
}

impl Parse for FieldAttribute {
    fn parse(input: ParseStream) -> Result<Self> {
        let index = input.parse::<LitInt>()?;

        let handler = if !input.is_empty() {
            input.parse::<Token![,]>()?;
            Some(input.parse::<ExprClosure>()?)
        } else {
            None
        };

        Ok(Self { index, handler })
    }
}

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::parse::{Parse, ParseStream, Parser, Result};
use syn::{
    parse_macro_input, punctuated::Punctuated, Error, Field, Fields, GenericParam, Ident,
    ItemStruct, LitStr, Token, Type,
};

// Must stay in sync with `form_token_guard::FORM_TOKEN_FIELD`.
const FORM_TOKEN_FIELD: &str = "_form_token";

#[derive(Debug)]
struct FormName {
    name: LitStr,
}

impl Parse for FormName {
    fn parse(input: ParseStream) -> Result<Self> {
        let vars = Punctuated::<syn::LitStr, Token![,]>::parse_terminated(input)?;
        if vars.len() != 1 {
            return Err(Error::new(
                input.span(),
                "expected exactly one form name, e.g. #[with_form_token(\"capture\")]",
            ));
        }
        let name = vars.first().cloned().ok_or_else(|| {
            Error::new(input.span(), "expected a form name for the form token")
        })?;
        if name.value().is_empty() {
            return Err(Error::new(name.span(), "form name must not be empty"));
        }
        if name.value().len() > 255 {
            return Err(Error::new(name.span(), "form name must be at most 255 bytes"));
        }
        Ok(Self { name })
    }
}

fn get_singular_lifetime(item: &ItemStruct) -> Option<Ident> {
    let generics = &item.generics;
    if generics.params.len() != 1 {
        return None;
    }
    if let Some(GenericParam::Lifetime(lifetime)) = generics.params.first() {
        Some(lifetime.lifetime.ident.clone())
    } else {
        None
    }
}

/// Binds a form struct to a logical form name and adds the reserved
/// `_form_token` field carrying the presented token.
///
/// Structs with a single lifetime get an `Option<&'a str>` field, all others
/// an `Option<String>`. An existing `_form_token` field is left alone.
#[proc_macro_attribute]
pub fn with_form_token(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_struct = parse_macro_input!(input as ItemStruct);
    let struct_name = item_struct.ident.clone();
    let form_name = parse_macro_input!(args as FormName).name;

    let lifetime = get_singular_lifetime(&item_struct);
    let ident = Ident::new(FORM_TOKEN_FIELD, Span::call_site());

    match item_struct.fields {
        Fields::Named(ref mut fields) => {
            let existing = fields
                .named
                .iter()
                .any(|f| f.ident.as_ref().map_or(false, |i| *i == ident));
            if !existing {
                if let Some(lifetime) = lifetime {
                    if let Ok(mut field) =
                        Field::parse_named.parse2(quote! { #ident: Option<&'a str> })
                    {
                        if let Type::Path(path) = &mut field.ty {
                            set_reference_lifetime(path, lifetime);
                        }
                        fields.named.push(field);
                    }
                } else if let Ok(field) =
                    syn::Field::parse_named.parse2(quote! { #ident: Option<String> })
                {
                    fields.named.push(field);
                }
            }
        }
        _ => {
            return Error::new_spanned(
                &item_struct.ident,
                "#[with_form_token] only supports structs with named fields",
            )
            .to_compile_error()
            .into();
        }
    }

    let (impl_generics, ty_generics, where_clause) = item_struct.generics.split_for_impl();

    quote! {
        #item_struct

        impl #impl_generics form_token_guard::WithUserProvidedFormToken
            for #struct_name #ty_generics #where_clause
        {
            fn form_token(&self) -> Option<&str> {
                self.#ident.as_deref()
            }
        }

        impl #impl_generics form_token_guard::BoundForm for #struct_name #ty_generics
            #where_clause
        {
            const FORM_NAME: &'static str = #form_name;
        }
    }
    .into()
}

// Rewrites the `'a` in `Option<&'a str>` to the struct's own lifetime.
fn set_reference_lifetime(path: &mut syn::TypePath, lifetime: Ident) {
    let Some(segment) = path.path.segments.last_mut() else {
        return;
    };
    let syn::PathArguments::AngleBracketed(args) = &mut segment.arguments else {
        return;
    };
    if let Some(syn::GenericArgument::Type(Type::Reference(reference))) = args.args.first_mut() {
        if let Some(field_lifetime) = reference.lifetime.as_mut() {
            field_lifetime.ident = lifetime;
        }
    }
}

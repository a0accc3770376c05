//! `DatabaseMapped` derive implementation.

mod attrs;

use attrs::{FieldKind, field_attr, struct_attr};
use proc_macro2::TokenStream;
use quote::{ToTokens, quote};
use syn::{Data, DeriveInput, Fields, Result};

pub fn expand(input: DeriveInput) -> Result<TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "DatabaseMapped can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "DatabaseMapped can only be derived for structs",
            ));
        }
    };

    let options = struct_attr(&input)?;
    let table = options
        .table
        .unwrap_or_else(|| name.to_string().to_lowercase());

    let mut specs = Vec::new();
    let mut value_arms = Vec::new();
    let mut set_arms = Vec::new();
    let mut zero_arms = Vec::new();

    for (index, field) in fields.iter().enumerate() {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let ty = &field.ty;
        let attr = field_attr(field)?;
        let field_name = ident.to_string();
        let tag = &attr.tag;
        let type_name = ty
            .to_token_stream()
            .to_string()
            .replace(' ', "");

        let spec = quote! {
            ::pgmap::__private::FieldSpec::new(#index, #field_name, #tag, #type_name)
        };
        specs.push(match attr.kind {
            FieldKind::Inline => quote! {
                #spec.with_inline(<#ty as ::pgmap::__private::DatabaseMapped>::field_specs)
            },
            _ => spec,
        });

        match attr.kind {
            FieldKind::Plain => {
                value_arms.push(quote! {
                    [#index] => ::std::result::Result::Ok(::pgmap::__private::field_value(&self.#ident)),
                });
                set_arms.push(quote! {
                    [#index] => ::pgmap::__private::set_field(&mut self.#ident, row, idx),
                });
                zero_arms.push(quote! {
                    [#index] => ::pgmap::__private::is_zero(&self.#ident),
                });
            }
            FieldKind::Json => {
                value_arms.push(quote! {
                    [#index] => ::pgmap::__private::json_value(&self.#ident),
                });
                set_arms.push(quote! {
                    [#index] => ::pgmap::__private::set_json(&mut self.#ident, row, idx),
                });
                zero_arms.push(quote! {
                    [#index] => ::pgmap::__private::is_json_zero(&self.#ident),
                });
            }
            FieldKind::Inline => {
                value_arms.push(quote! {
                    [#index, rest @ ..] => ::pgmap::__private::DatabaseMapped::column_value(&self.#ident, rest),
                });
                set_arms.push(quote! {
                    [#index, rest @ ..] => ::pgmap::__private::DatabaseMapped::set_column(&mut self.#ident, rest, row, idx),
                });
                zero_arms.push(quote! {
                    [#index, rest @ ..] => ::pgmap::__private::DatabaseMapped::is_zero_column(&self.#ident, rest),
                });
            }
            FieldKind::Skipped => {}
        }
    }

    let cache_key = options.cache_key.map(|key| {
        quote! {
            fn column_meta_cache_key() -> ::std::option::Option<&'static str> {
                ::std::option::Option::Some(#key)
            }
        }
    });

    let self_populate = options.populatable.then(|| {
        quote! {
            fn self_populate<R: ::pgmap::__private::RowScanner + ?Sized>(
                &mut self,
                row: &R,
            ) -> ::std::option::Option<::pgmap::__private::OrmResult<()>> {
                ::std::option::Option::Some(
                    <Self as ::pgmap::__private::Populatable>::populate(self, row),
                )
            }
        }
    });

    Ok(quote! {
        impl #impl_generics ::pgmap::__private::DatabaseMapped for #name #ty_generics #where_clause {
            fn table_name() -> &'static str {
                #table
            }

            #cache_key

            fn field_specs() -> ::std::vec::Vec<::pgmap::__private::FieldSpec> {
                ::std::vec![#(#specs),*]
            }

            fn column_value(
                &self,
                path: &[usize],
            ) -> ::pgmap::__private::OrmResult<::pgmap::__private::ColumnValue<'_>> {
                match path {
                    #(#value_arms)*
                    _ => ::std::result::Result::Err(::pgmap::__private::unsettable::<Self>(path)),
                }
            }

            fn set_column<R: ::pgmap::__private::RowScanner + ?Sized>(
                &mut self,
                path: &[usize],
                row: &R,
                idx: usize,
            ) -> ::pgmap::__private::OrmResult<()> {
                match path {
                    #(#set_arms)*
                    _ => ::std::result::Result::Err(::pgmap::__private::unsettable::<Self>(path)),
                }
            }

            fn is_zero_column(&self, path: &[usize]) -> bool {
                match path {
                    #(#zero_arms)*
                    _ => false,
                }
            }

            #self_populate
        }
    })
}

/*!
Derive macro for [`Queryable`].

```rust,ignore
#[derive(Queryable)]
struct User {
    name: String,
    #[sedge(rename = "login_count")]
    logins: i64,
    #[sedge(json)]
    settings: Settings,
}
```

Struct fields must match the queried shape by name, in select order;
implicit fields injected by the server are skipped automatically.
Containers marked `#[sedge(json)]` decode from a single `std::json` value
via `serde`. Enums decode from enumeration values by variant name.
*/

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::spanned::Spanned;

mod attrib;

use attrib::{ContainerAttrs, FieldAttrs};

#[proc_macro_derive(Queryable, attributes(sedge))]
pub fn queryable_derive(input: TokenStream) -> TokenStream {
    let item = syn::parse_macro_input!(input as syn::DeriveInput);
    match derive(&item) {
        Ok(stream) => stream.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn derive(item: &syn::DeriveInput) -> syn::Result<TokenStream2> {
    let attrs = ContainerAttrs::from_syn(&item.attrs)?;
    match &item.data {
        syn::Data::Struct(data) if attrs.json => derive_json(item, &attrs, data),
        syn::Data::Struct(data) => derive_struct(item, &attrs, data),
        syn::Data::Enum(data) => derive_enum(item, &attrs, data),
        _ => Err(syn::Error::new_spanned(
            item,
            "only structs and enums can derive Queryable",
        )),
    }
}

fn derive_json(
    item: &syn::DeriveInput,
    attrs: &ContainerAttrs,
    _data: &syn::DataStruct,
) -> syn::Result<TokenStream2> {
    let path = attrs.protocol_path();
    let name = &item.ident;
    let (impl_generics, ty_generics, where_clause) = item.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics #path::queryable::Queryable for #name #ty_generics #where_clause {
            type Args = ();

            fn check_descriptor(
                ctx: &#path::queryable::DescriptorContext,
                type_pos: #path::descriptors::TypePos,
            ) -> ::std::result::Result<(), #path::queryable::DescriptorMismatch> {
                <#path::model::Json as #path::queryable::Queryable>
                    ::check_descriptor(ctx, type_pos)
            }

            fn decode(
                decoder: &#path::queryable::Decoder,
                args: &(),
                buf: &[u8],
            ) -> ::std::result::Result<Self, #path::errors::DecodeError> {
                let json = <#path::model::Json as #path::queryable::Queryable>
                    ::decode(decoder, args, buf)?;
                ::serde_json::from_str(&json).map_err(#path::errors::decode_error)
            }
        }
    })
}

fn derive_struct(
    item: &syn::DeriveInput,
    attrs: &ContainerAttrs,
    data: &syn::DataStruct,
) -> syn::Result<TokenStream2> {
    let path = attrs.protocol_path();
    let name = &item.ident;
    let (impl_generics, ty_generics, where_clause) = item.generics.split_for_impl();

    let syn::Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new(
            data.fields.span(),
            "only named fields are supported",
        ));
    };

    let mut wire_names = Vec::new();
    let mut idents = Vec::new();
    let mut arg_types = Vec::new();
    let mut decode_exprs = Vec::new();
    for field in &named.named {
        let field_attrs = FieldAttrs::from_syn(&field.attrs)?;
        let ident = field.ident.clone().expect("named field");
        let ty = &field.ty;
        let wire_name = field_attrs
            .rename
            .map(|lit| lit.value())
            .unwrap_or_else(|| ident.to_string().trim_start_matches("r#").to_string());
        wire_names.push(wire_name);
        idents.push(ident);
        if field_attrs.json {
            arg_types.push(quote! { () });
            decode_exprs.push(quote! {
                {
                    let json = <#path::model::Json as #path::queryable::Queryable>
                        ::decode_optional(decoder, arg, data)?;
                    ::serde_json::from_str(&json).map_err(#path::errors::decode_error)?
                }
            });
        } else {
            arg_types.push(quote! { <#ty as #path::queryable::Queryable>::Args });
            decode_exprs.push(quote! {
                <#ty as #path::queryable::Queryable>::decode_optional(decoder, arg, data)?
            });
        }
    }

    let field_count = idents.len();
    let indexes = (0..field_count).map(syn::Index::from).collect::<Vec<_>>();
    let arg_slots = idents
        .iter()
        .map(|ident| quote::format_ident!("arg_{}", ident))
        .collect::<Vec<_>>();
    let value_slots = idents
        .iter()
        .map(|ident| quote::format_ident!("value_{}", ident))
        .collect::<Vec<_>>();
    let check_arms = wire_names
        .iter()
        .zip(&arg_slots)
        .zip(named.named.iter().zip(&indexes))
        .map(|((wire_name, arg_slot), (field, index))| {
            let field_attrs = FieldAttrs::from_syn(&field.attrs)?;
            let ty = &field.ty;
            let check = if field_attrs.json {
                quote! {
                    <#path::model::Json as #path::queryable::Queryable>
                        ::check_descriptor(ctx, element.type_pos)?
                }
            } else {
                quote! {
                    <#ty as #path::queryable::Queryable>
                        ::check_descriptor(ctx, element.type_pos)?
                }
            };
            Ok(quote! {
                #wire_name => {
                    #arg_slot = ::std::option::Option::Some(#check);
                    slots.push(::std::option::Option::Some(#index));
                }
            })
        })
        .collect::<syn::Result<Vec<_>>>()?;
    let decode_arms = indexes
        .iter()
        .zip(&value_slots)
        .zip(&decode_exprs)
        .map(|((index, value_slot), decode_expr)| {
            quote! {
                ::std::option::Option::Some(#index) => {
                    let arg = &args.1.#index;
                    #value_slot = ::std::option::Option::Some(#decode_expr);
                }
            }
        })
        .collect::<Vec<_>>();
    let missing_checks = wire_names.iter().zip(&arg_slots).map(|(wire_name, slot)| {
        quote! {
            let #slot = #slot.ok_or_else(|| {
                ctx.expected(format!("field {:?} is missing", #wire_name))
            })?;
        }
    });
    let field_inits = idents.iter().zip(&value_slots).map(|(ident, value_slot)| {
        quote! {
            #ident: match #value_slot {
                ::std::option::Option::Some(value) => value,
                ::std::option::Option::None => {
                    return #path::errors::MissingRequiredElement.fail();
                }
            }
        }
    });

    Ok(quote! {
        impl #impl_generics #path::queryable::Queryable for #name #ty_generics #where_clause {
            type Args = (
                ::std::vec::Vec<::std::option::Option<usize>>,
                (#(#arg_types,)*),
            );

            fn check_descriptor(
                ctx: &#path::queryable::DescriptorContext,
                type_pos: #path::descriptors::TypePos,
            ) -> ::std::result::Result<Self::Args, #path::queryable::DescriptorMismatch> {
                let elements = #path::queryable::struct_elements(ctx, type_pos)?;
                let mut slots = ::std::vec::Vec::with_capacity(elements.len());
                #( let mut #arg_slots = ::std::option::Option::None; )*
                for element in &elements {
                    match element.name {
                        #( #check_arms )*
                        _ if element.implicit => slots.push(::std::option::Option::None),
                        name => {
                            return ::std::result::Result::Err(
                                ctx.expected(format!("unexpected field {name:?}")),
                            );
                        }
                    }
                }
                #( #missing_checks )*
                ::std::result::Result::Ok((slots, (#(#arg_slots,)*)))
            }

            fn decode(
                decoder: &#path::queryable::Decoder,
                args: &Self::Args,
                buf: &[u8],
            ) -> ::std::result::Result<Self, #path::errors::DecodeError> {
                let mut fields = #path::queryable::RawFields::new(buf, args.0.len())?;
                #( let mut #value_slots = ::std::option::Option::None; )*
                for slot in &args.0 {
                    let data = fields.read()?;
                    match *slot {
                        #( #decode_arms )*
                        _ => {}
                    }
                }
                fields.finish()?;
                ::std::result::Result::Ok(#name {
                    #( #field_inits, )*
                })
            }
        }
    })
}

fn derive_enum(
    item: &syn::DeriveInput,
    attrs: &ContainerAttrs,
    data: &syn::DataEnum,
) -> syn::Result<TokenStream2> {
    let path = attrs.protocol_path();
    let name = &item.ident;
    let (impl_generics, ty_generics, where_clause) = item.generics.split_for_impl();

    let mut member_names = Vec::new();
    let mut variants = Vec::new();
    for variant in &data.variants {
        if !matches!(variant.fields, syn::Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "only unit variants can derive Queryable",
            ));
        }
        let field_attrs = FieldAttrs::from_syn(&variant.attrs)?;
        let ident = &variant.ident;
        member_names.push(
            field_attrs
                .rename
                .map(|lit| lit.value())
                .unwrap_or_else(|| ident.to_string()),
        );
        variants.push(ident.clone());
    }

    Ok(quote! {
        impl #impl_generics #path::queryable::Queryable for #name #ty_generics #where_clause {
            type Args = ();

            fn check_descriptor(
                ctx: &#path::queryable::DescriptorContext,
                type_pos: #path::descriptors::TypePos,
            ) -> ::std::result::Result<(), #path::queryable::DescriptorMismatch> {
                match ctx.get(type_pos)? {
                    #path::descriptors::Descriptor::Enumeration(descriptor) => {
                        for member in &descriptor.members {
                            match member.as_str() {
                                #( #member_names => {} )*
                                member => {
                                    return ::std::result::Result::Err(ctx.expected(
                                        format!("unexpected enum member {member:?}"),
                                    ));
                                }
                            }
                        }
                        ::std::result::Result::Ok(())
                    }
                    descriptor => {
                        ::std::result::Result::Err(ctx.wrong_type(descriptor, "enum"))
                    }
                }
            }

            fn decode(
                _decoder: &#path::queryable::Decoder,
                _args: &(),
                buf: &[u8],
            ) -> ::std::result::Result<Self, #path::errors::DecodeError> {
                let member: &str =
                    <&str as #path::serialization::decode::RawCodec>::decode(buf)?;
                match member {
                    #( #member_names => ::std::result::Result::Ok(#name::#variants), )*
                    _ => #path::errors::ExtraEnumValue.fail(),
                }
            }
        }
    })
}

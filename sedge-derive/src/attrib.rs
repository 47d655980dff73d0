use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;

enum FieldAttr {
    Json,
    Rename(syn::LitStr),
}

enum ContainerAttr {
    Json,
    CratePath(syn::Path),
}

struct FieldAttrList(pub Punctuated<FieldAttr, syn::Token![,]>);
struct ContainerAttrList(pub Punctuated<ContainerAttr, syn::Token![,]>);

pub struct FieldAttrs {
    pub json: bool,
    pub rename: Option<syn::LitStr>,
}

pub struct ContainerAttrs {
    pub json: bool,
    pub crate_path: Option<syn::Path>,
}

impl ContainerAttrs {
    pub fn protocol_path(&self) -> syn::Path {
        self.crate_path
            .clone()
            .unwrap_or_else(|| syn::parse_str("::sedge_protocol").unwrap())
    }
}

mod kw {
    syn::custom_keyword!(json);
    syn::custom_keyword!(crate_path);
    syn::custom_keyword!(rename);
}

impl Parse for FieldAttr {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let lookahead = input.lookahead1();
        if lookahead.peek(kw::json) {
            let _ident: syn::Ident = input.parse()?;
            Ok(FieldAttr::Json)
        } else if lookahead.peek(kw::rename) {
            input.parse::<kw::rename>()?;
            input.parse::<syn::Token![=]>()?;
            Ok(FieldAttr::Rename(input.parse()?))
        } else {
            Err(lookahead.error())
        }
    }
}

impl Parse for ContainerAttr {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let lookahead = input.lookahead1();
        if lookahead.peek(kw::json) {
            let _ident: syn::Ident = input.parse()?;
            Ok(ContainerAttr::Json)
        } else if lookahead.peek(kw::crate_path) {
            input.parse::<kw::crate_path>()?;
            input.parse::<syn::Token![=]>()?;
            Ok(ContainerAttr::CratePath(input.parse()?))
        } else {
            Err(lookahead.error())
        }
    }
}

impl Parse for ContainerAttrList {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        Punctuated::parse_terminated(input).map(ContainerAttrList)
    }
}

impl Parse for FieldAttrList {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        Punctuated::parse_terminated(input).map(FieldAttrList)
    }
}

impl FieldAttrs {
    pub fn from_syn(attrs: &[syn::Attribute]) -> syn::Result<FieldAttrs> {
        let mut result = FieldAttrs {
            json: false,
            rename: None,
        };
        for attr in attrs {
            if attr.path().is_ident("sedge") {
                let chunk: FieldAttrList = attr.parse_args()?;
                for item in chunk.0 {
                    match item {
                        FieldAttr::Json => result.json = true,
                        FieldAttr::Rename(name) => result.rename = Some(name),
                    }
                }
            }
        }
        Ok(result)
    }
}

impl ContainerAttrs {
    pub fn from_syn(attrs: &[syn::Attribute]) -> syn::Result<ContainerAttrs> {
        let mut result = ContainerAttrs {
            json: false,
            crate_path: None,
        };
        for attr in attrs {
            if attr.path().is_ident("sedge") {
                let chunk: ContainerAttrList = attr.parse_args()?;
                for item in chunk.0 {
                    match item {
                        ContainerAttr::Json => result.json = true,
                        ContainerAttr::CratePath(path) => result.crate_path = Some(path),
                    }
                }
            }
        }
        Ok(result)
    }
}

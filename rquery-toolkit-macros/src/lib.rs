use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Lit, Meta, NestedMeta};

#[cfg(test)]
mod tests;

/// Declares the schema of a struct mapped to one table.
///
/// ```ignore
/// #[derive(Entity)]
/// #[table(name = "Products", schema = "dbo")]
/// struct Product {
///     #[key(is_identity = true)]
///     #[column(name = "Id")]
///     id: i32,
///     #[column(name = "Name", required)]
///     name: String,
///     #[column(name = "Total", computed)]
///     total: Option<Decimal>,
///     #[not_mapped]
///     cached: String,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(table, column, key, not_mapped))]
pub fn entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    entity_impl(input).into()
}

pub(crate) fn entity_impl(input: DeriveInput) -> TokenStream2 {
    match expand(&input) {
        Ok(tokens) => tokens,
        Err(e) => e.to_compile_error(),
    }
}

#[derive(Default)]
struct FieldSpec {
    column: Option<String>,
    key: bool,
    identity: bool,
    required: bool,
    computed: bool,
    not_mapped: bool,
}

fn str_value(lit: &Lit) -> syn::Result<String> {
    match lit {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

fn bool_value(lit: &Lit) -> syn::Result<bool> {
    match lit {
        Lit::Bool(b) => Ok(b.value),
        other => Err(syn::Error::new_spanned(other, "expected a boolean literal")),
    }
}

fn nested(attr: &Attribute) -> syn::Result<Vec<NestedMeta>> {
    match attr.parse_meta()? {
        Meta::Path(_) => Ok(Vec::new()),
        Meta::List(list) => Ok(list.nested.into_iter().collect()),
        Meta::NameValue(nv) => Err(syn::Error::new_spanned(nv, "expected a list of options")),
    }
}

fn table_spec(input: &DeriveInput) -> syn::Result<(String, Option<String>)> {
    let mut name = input.ident.to_string();
    let mut schema = None;
    for attr in input.attrs.iter().filter(|a| a.path.is_ident("table")) {
        for item in nested(attr)? {
            match item {
                NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("name") => {
                    name = str_value(&nv.lit)?;
                }
                NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("schema") => {
                    schema = Some(str_value(&nv.lit)?);
                }
                other => return Err(syn::Error::new_spanned(other, "unknown table option")),
            }
        }
    }
    Ok((name, schema))
}

fn field_spec(attrs: &[Attribute]) -> syn::Result<FieldSpec> {
    let mut spec = FieldSpec::default();
    for attr in attrs {
        if attr.path.is_ident("not_mapped") {
            spec.not_mapped = true;
        } else if attr.path.is_ident("key") {
            spec.key = true;
            for item in nested(attr)? {
                match item {
                    NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("is_identity") => {
                        spec.identity = bool_value(&nv.lit)?;
                    }
                    NestedMeta::Meta(Meta::Path(p)) if p.is_ident("identity") => {
                        spec.identity = true;
                    }
                    other => return Err(syn::Error::new_spanned(other, "unknown key option")),
                }
            }
        } else if attr.path.is_ident("column") {
            for item in nested(attr)? {
                match item {
                    NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("name") => {
                        spec.column = Some(str_value(&nv.lit)?);
                    }
                    NestedMeta::Meta(Meta::NameValue(nv)) if nv.path.is_ident("required") => {
                        spec.required = bool_value(&nv.lit)?;
                    }
                    NestedMeta::Meta(Meta::Path(p)) if p.is_ident("required") => spec.required = true,
                    NestedMeta::Meta(Meta::Path(p)) if p.is_ident("identity") => spec.identity = true,
                    NestedMeta::Meta(Meta::Path(p)) if p.is_ident("computed") => spec.computed = true,
                    NestedMeta::Meta(Meta::Path(p)) if p.is_ident("ignore") => spec.not_mapped = true,
                    other => return Err(syn::Error::new_spanned(other, "unknown column option")),
                }
            }
        }
    }
    Ok(spec)
}

/// Last path segment of `ty` and the type inside `Option`, if any.
fn unwrap_option(ty: &syn::Type) -> (bool, &syn::Type) {
    if let syn::Type::Path(tp) = ty {
        if let Some(seg) = tp.path.segments.last() {
            if seg.ident == "Option" {
                if let syn::PathArguments::AngleBracketed(args) = &seg.arguments {
                    if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                        return (true, inner);
                    }
                }
            }
        }
    }
    (false, ty)
}

fn sql_type(ty: &syn::Type) -> syn::Result<syn::Ident> {
    let unsupported = || {
        syn::Error::new_spanned(
            ty,
            "unsupported field type; use i32, i64, f64, bool, String, Uuid, Decimal, NaiveDateTime or Vec<u8>",
        )
    };
    let seg = match ty {
        syn::Type::Path(tp) => tp.path.segments.last().ok_or_else(unsupported)?,
        _ => return Err(unsupported()),
    };
    let name = match seg.ident.to_string().as_str() {
        "i32" => "Int",
        "i64" => "BigInt",
        "f64" => "Float",
        "bool" => "Bool",
        "String" => "Text",
        "Uuid" => "Uuid",
        "Decimal" => "Decimal",
        "NaiveDateTime" => "DateTime",
        "Vec" => "Bytes",
        _ => return Err(unsupported()),
    };
    Ok(syn::Ident::new(name, Span::call_site()))
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let (table_name, table_schema) = table_spec(input)?;

    let fields = match &input.data {
        Data::Struct(ds) => match &ds.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    struct_name,
                    "Entity requires a struct with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                struct_name,
                "Entity can only be derived for structs",
            ))
        }
    };

    let mut descriptors = Vec::new();
    let mut not_mapped = Vec::new();
    let mut params = Vec::new();
    let mut from_row_fields = Vec::new();
    let mut column_consts = Vec::new();

    for field in fields {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "unnamed field"))?;
        let name = ident.to_string();
        let ty = &field.ty;
        let spec = field_spec(&field.attrs)?;

        if spec.not_mapped {
            not_mapped.push(quote! { .not_mapped(#name) });
            from_row_fields.push(quote! { #ident: ::std::default::Default::default() });
            continue;
        }

        let column = spec.column.clone().unwrap_or_else(|| name.clone());
        let (nullable, inner) = unwrap_option(ty);
        let sql_ty = sql_type(inner)?;

        let mut flags = Vec::new();
        if spec.column.is_some() {
            flags.push(quote! { .column(#column) });
        }
        if nullable {
            flags.push(quote! { .nullable() });
        }
        if spec.key {
            flags.push(quote! { .key() });
        }
        if spec.identity {
            flags.push(quote! { .identity() });
        }
        if spec.required {
            flags.push(quote! { .required() });
        }
        if spec.computed {
            flags.push(quote! { .computed() });
        }

        descriptors.push(quote! {
            .field(
                ::rquery_toolkit::metadata::FieldDescriptor::new(
                    #name,
                    ::rquery_toolkit::query::SqlType::#sql_ty,
                )
                #(#flags)*
            )
        });
        params.push(quote! {
            .add(#name, ::std::clone::Clone::clone(&self.#ident))
        });
        from_row_fields.push(quote! {
            #ident: row.get_or_default::<#ty>(#column)?
        });
        let const_ident = format_ident!("{}", name);
        column_consts.push(quote! {
            pub const #const_ident: &'static str = #column;
        });
    }

    let schema_call = table_schema.map(|s| quote! { .schema(#s) });

    Ok(quote! {
        impl ::rquery_toolkit::mapping::Entity for #struct_name {
            fn describe() -> ::rquery_toolkit::metadata::EntityMetadata {
                ::rquery_toolkit::metadata::EntityMetadata::builder(#table_name)
                    #schema_call
                    #(#descriptors)*
                    #(#not_mapped)*
                    .build()
            }

            fn to_params(&self) -> ::rquery_toolkit::query::Params {
                ::rquery_toolkit::query::Params::new()
                    #(#params)*
            }
        }

        impl ::rquery_toolkit::mapping::FromRow for #struct_name {
            fn from_row(
                row: &::rquery_toolkit::mapping::Row,
            ) -> ::std::result::Result<Self, ::rquery_toolkit::anyhow::Error> {
                Ok(Self {
                    #(#from_row_fields),*
                })
            }
        }

        #[allow(non_upper_case_globals)]
        impl #struct_name {
            pub const TABLE: &'static str = #table_name;
            #(#column_consts)*
        }
    })
}

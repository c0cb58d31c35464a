//! Renders Rust items for validated models.
//!
//! Every valid (model, dialect) pair gets a module of SQL constants and
//! parameter specs plus `Entity` (and for bulk models `BulkEntity`) impls
//! that point at them. Every valid model gets one `FromRow` impl; rows are
//! read by property name, which the generated SELECTs alias to.

use std::collections::{BTreeMap, HashMap};

use bulkgen_core::sql::{ColumnModel, TableModel, TableSql};
use bulkgen_core::{ColumnSize, DbType, Dialect};
use convert_case::{Case, Casing};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::discovery::{Capability, ModelDecl, Property};
use crate::resolve::{EnumRef, SemanticType};
use crate::scan::GENERATED_HEADER;

/// One dialect's table for a model that passed validation.
#[derive(Debug, Clone)]
pub struct DialectTable {
    pub table: TableModel,
    pub sql: TableSql,
}

/// A model ready for emission.
#[derive(Debug, Clone)]
pub struct ModelUnit<'a> {
    pub model: &'a ModelDecl,
    /// One per property, in declaration order.
    pub semantics: Vec<SemanticType>,
    /// Empty for result-only models.
    pub tables: Vec<DialectTable>,
}

/// Name of the generated module for a model and dialect.
pub fn module_name(model: &ModelDecl, dialect: Dialect, qualify: bool) -> String {
    let base = if qualify && !model.module.is_empty() {
        format!("{}_{}", model.module.join("_"), model.name)
    } else {
        model.name.clone()
    };
    format!("{}_{}", base.to_case(Case::Snake), dialect.name())
}

/// Renders the whole generated file. Output depends only on `units`.
pub fn render(units: &[ModelUnit<'_>]) -> String {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for unit in units {
        *seen.entry(unit.model.name.as_str()).or_default() += 1;
    }

    let mut decoders: BTreeMap<String, TokenStream> = BTreeMap::new();
    let mut items: Vec<TokenStream> = Vec::new();
    for unit in units {
        let qualify = seen.get(unit.model.name.as_str()).copied().unwrap_or_default() > 1;
        for table in &unit.tables {
            let module = format_ident!("{}", module_name(unit.model, table.table.dialect, qualify));
            items.push(sql_module(unit, table, &module));
            items.push(entity_impl(unit, table, &module));
            if unit.model.capability == Capability::Bulk {
                if let Some(bulk) = bulk_entity_impl(unit, table, &module) {
                    items.push(bulk);
                }
            }
        }
        for semantic in &unit.semantics {
            if let SemanticType::Enum(e) = semantic {
                decoders.entry(e.path.clone()).or_insert_with(|| enum_decoder(e));
            }
        }
        items.push(from_row_impl(unit));
    }

    let mut out = String::new();
    out.push_str(GENERATED_HEADER);
    out.push_str(". Do not edit.\n");
    for item in decoders.values().chain(items.iter()) {
        out.push('\n');
        out.push_str(&item.to_string());
        out.push('\n');
    }
    out
}

fn model_path(model: &ModelDecl) -> TokenStream {
    path_tokens(&model.path())
}

fn path_tokens(path: &str) -> TokenStream {
    let segments = path.split("::").map(|s| format_ident!("{}", s));
    quote!(#(#segments)::*)
}

fn marker(dialect: Dialect) -> TokenStream {
    match dialect {
        Dialect::SqlServer => quote!(::bulkgen::SqlServer),
        Dialect::Postgres => quote!(::bulkgen::Postgres),
    }
}

fn db_type_tokens(db_type: DbType) -> TokenStream {
    let variant = format_ident!("{}", db_type.variant_name());
    match db_type {
        DbType::SqlServer(_) => quote!(::bulkgen::DbType::SqlServer(::bulkgen::SqlServerType::#variant)),
        DbType::Postgres(_) => quote!(::bulkgen::DbType::Postgres(::bulkgen::PostgresType::#variant)),
    }
}

fn opt_str(value: Option<&str>) -> TokenStream {
    match value {
        Some(s) => quote!(::core::option::Option::Some(#s)),
        None => quote!(::core::option::Option::None),
    }
}

fn const_ident(property: &str) -> proc_macro2::Ident {
    format_ident!("{}", property.to_case(Case::Constant))
}

fn param_spec(column: &ColumnModel) -> TokenStream {
    let name = column.param_name();
    let db_type = db_type_tokens(column.db_type);
    let mut spec = quote!(::bulkgen::ParamSpec::new(#name, #db_type));
    match column.size {
        Some(ColumnSize::Len(n)) if column.db_type.takes_size() => {
            spec = quote!(#spec.with_size(::bulkgen::ColumnSize::Len(#n)));
        }
        Some(ColumnSize::Max) if column.db_type.takes_size() => {
            spec = quote!(#spec.with_size(::bulkgen::ColumnSize::Max));
        }
        _ => {}
    }
    if column.db_type.takes_precision() {
        if let (Some(p), Some(s)) = (column.precision, column.scale) {
            spec = quote!(#spec.with_precision(#p, #s));
        }
    }
    spec
}

fn sql_module(unit: &ModelUnit<'_>, table: &DialectTable, module: &proc_macro2::Ident) -> TokenStream {
    let sql = &table.sql;
    let TableSql {
        table: name,
        create,
        insert,
        insert_batch,
        insert_width,
        truncate,
        select,
        ..
    } = sql;
    let update = opt_str(sql.update.as_deref());
    let delete = opt_str(sql.delete.as_deref());
    let delete_batch = opt_str(sql.delete_batch.as_deref());
    let upsert = opt_str(sql.upsert.as_deref());
    let find = opt_str(sql.find.as_deref());

    let staging = match (&sql.staging, unit.model.capability) {
        (Some(staging), Capability::Bulk) => {
            let table_name = &staging.table;
            let staging_create = &staging.create;
            let columns = &staging.columns;
            let apply = &staging.apply;
            let apply_indexed = &staging.apply_indexed;
            quote! {
                pub static STAGING: ::bulkgen::StagingSql = ::bulkgen::StagingSql {
                    table: #table_name,
                    create: #staging_create,
                    columns: &[#(#columns),*],
                    apply: #apply,
                    apply_indexed: #apply_indexed,
                };
            }
        }
        _ => quote!(),
    };

    let params = table.table.columns.iter().map(|column| {
        let spec_name = const_ident(&column.property);
        let spec = param_spec(column);
        let property = unit.model.property(&column.property);
        let factory = property.map(|p| {
            let ident = &p.ident;
            quote! {
                pub fn #ident(value: impl ::core::convert::Into<::bulkgen::Value>) -> ::bulkgen::Param {
                    Self::#spec_name.bind(value)
                }
            }
        });
        quote! {
            pub const #spec_name: ::bulkgen::ParamSpec = #spec;
            #factory
        }
    });

    let doc = format!(
        " SQL and parameters for `{}` on {}.",
        unit.model.name,
        table.table.dialect
    );
    quote! {
        #[doc = #doc]
        #[allow(dead_code)]
        pub mod #module {
            pub const TABLE: &str = #name;
            pub const CREATE: &str = #create;
            pub const INSERT: &str = #insert;
            pub const INSERT_BATCH: &str = #insert_batch;
            pub const INSERT_WIDTH: usize = #insert_width;
            pub const UPDATE: ::core::option::Option<&str> = #update;
            pub const DELETE: ::core::option::Option<&str> = #delete;
            pub const DELETE_BATCH: ::core::option::Option<&str> = #delete_batch;
            pub const UPSERT: ::core::option::Option<&str> = #upsert;
            pub const TRUNCATE: &str = #truncate;
            pub const SELECT: &str = #select;
            pub const FIND: ::core::option::Option<&str> = #find;

            pub static SQL: ::bulkgen::EntitySql = ::bulkgen::EntitySql {
                table: TABLE,
                create: CREATE,
                insert: INSERT,
                insert_batch: INSERT_BATCH,
                insert_width: INSERT_WIDTH,
                update: UPDATE,
                delete: DELETE,
                delete_batch: DELETE_BATCH,
                upsert: UPSERT,
                truncate: TRUNCATE,
                select: SELECT,
                find: FIND,
            };

            #staging

            /// Parameter specs and typed factories, one per column.
            pub struct Params;

            impl Params {
                #(#params)*
            }
        }
    }
}

fn property_and_semantic<'u>(unit: &'u ModelUnit<'_>, name: &str) -> Option<(&'u Property, &'u SemanticType)> {
    let index = unit.model.properties.iter().position(|p| p.name == name)?;
    Some((&unit.model.properties[index], unit.semantics.get(index)?))
}

/// Owned value of a property, ready for `Into<Value>`.
fn value_expr(property: &Property, semantic: &SemanticType) -> TokenStream {
    let ident = &property.ident;
    match semantic {
        SemanticType::Enum(e) => {
            let repr = format_ident!("{}", e.repr.rust_name());
            if property.optional {
                quote!(self.#ident.clone().map(|v| v as #repr))
            } else {
                quote!(self.#ident.clone() as #repr)
            }
        }
        _ => quote!(self.#ident.clone()),
    }
}

fn bind_list<'c>(
    unit: &ModelUnit<'_>,
    module: &proc_macro2::Ident,
    columns: impl IntoIterator<Item = &'c ColumnModel>,
) -> TokenStream {
    let binds = columns.into_iter().filter_map(|column| {
        let (property, semantic) = property_and_semantic(unit, &column.property)?;
        let spec = const_ident(&column.property);
        let value = value_expr(property, semantic);
        Some(quote!(#module::Params::#spec.bind(#value)))
    });
    quote!(::std::vec![#(#binds),*])
}

fn entity_impl(unit: &ModelUnit<'_>, table: &DialectTable, module: &proc_macro2::Ident) -> TokenStream {
    let path = model_path(unit.model);
    let marker = marker(table.table.dialect);
    let model = &table.table;
    let insert = bind_list(unit, module, model.insert_columns());
    let update = bind_list(
        unit,
        module,
        model.update_columns().into_iter().chain(model.key_columns()),
    );
    let keys = bind_list(unit, module, model.key_columns());
    quote! {
        #[allow(clippy::clone_on_copy)]
        impl ::bulkgen::Entity<#marker> for #path {
            fn sql() -> &'static ::bulkgen::EntitySql {
                &#module::SQL
            }

            fn insert_params(&self) -> ::std::vec::Vec<::bulkgen::Param> {
                #insert
            }

            fn update_params(&self) -> ::std::vec::Vec<::bulkgen::Param> {
                #update
            }

            fn key_params(&self) -> ::std::vec::Vec<::bulkgen::Param> {
                #keys
            }
        }
    }
}

fn bulk_entity_impl(unit: &ModelUnit<'_>, table: &DialectTable, module: &proc_macro2::Ident) -> Option<TokenStream> {
    table.sql.staging.as_ref()?;
    let path = model_path(unit.model);
    let marker = marker(table.table.dialect);
    let values = table.table.columns.iter().filter_map(|column| {
        let (property, semantic) = property_and_semantic(unit, &column.property)?;
        let value = value_expr(property, semantic);
        Some(quote!(::bulkgen::Value::from(#value)))
    });
    Some(quote! {
        #[allow(clippy::clone_on_copy)]
        impl ::bulkgen::BulkEntity<#marker> for #path {
            fn staging() -> &'static ::bulkgen::StagingSql {
                &#module::STAGING
            }

            fn staging_row(&self) -> ::std::vec::Vec<::bulkgen::Value> {
                ::std::vec![#(#values),*]
            }
        }
    })
}

fn decoder_ident(e: &EnumRef) -> proc_macro2::Ident {
    let flat = e.path.trim_start_matches("crate::").replace("::", "_");
    format_ident!("__bulkgen_decode_{}", flat.to_case(Case::Snake))
}

fn enum_decoder(e: &EnumRef) -> TokenStream {
    let ident = decoder_ident(e);
    let path = path_tokens(&e.path);
    let repr = format_ident!("{}", e.repr.rust_name());
    let name = &e.name;
    let arms = e.variants.iter().map(|variant| {
        let variant = format_ident!("{}", variant);
        quote! {
            if raw == #path::#variant as #repr {
                return ::core::result::Result::Ok(#path::#variant);
            }
        }
    });
    quote! {
        #[allow(dead_code)]
        fn #ident(raw: #repr, column: &str) -> ::bulkgen::Result<#path> {
            #(#arms)*
            ::core::result::Result::Err(::bulkgen::Error::Decode {
                column: column.to_owned(),
                message: ::std::format!("{} is not a valid {}", raw, #name),
            })
        }
    }
}

fn from_row_impl(unit: &ModelUnit<'_>) -> TokenStream {
    let path = model_path(unit.model);
    let fields = unit
        .model
        .properties
        .iter()
        .zip(&unit.semantics)
        .map(|(property, semantic)| {
            let ident = &property.ident;
            let name = &property.name;
            let value = match semantic {
                SemanticType::Enum(e) => {
                    let decode = decoder_ident(e);
                    let repr = format_ident!("{}", e.repr.rust_name());
                    if property.optional {
                        quote! {
                            match row.get::<::core::option::Option<#repr>>(#name)? {
                                ::core::option::Option::Some(raw) => ::core::option::Option::Some(#decode(raw, #name)?),
                                ::core::option::Option::None => ::core::option::Option::None,
                            }
                        }
                    } else {
                        quote!(#decode(row.get::<#repr>(#name)?, #name)?)
                    }
                }
                _ => quote!(row.get(#name)?),
            };
            quote!(#ident: #value)
        });
    quote! {
        impl ::bulkgen::FromRow for #path {
            fn from_row(row: &::bulkgen::Row) -> ::bulkgen::Result<Self> {
                ::core::result::Result::Ok(Self {
                    #(#fields),*
                })
            }
        }
    }
}

//! Finds models by their capability impls and pairs them with profiles.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bulkgen_core::Dialect;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::ext::IdentExt;
use syn::{Fields, ImplItem, Token};

use crate::GeneratorConfig;
use crate::diagnostic::{Diagnostic, DiagnosticKind, Location};
use crate::expr::Expr;
use crate::scan::{Located, SourceSet};

/// Which generated surface a model asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Result,
    Domain,
    Bulk,
}

impl Capability {
    fn from_trait(name: &str) -> Option<Self> {
        match name {
            "ResultModel" => Some(Capability::Result),
            "DomainModel" => Some(Capability::Domain),
            "BulkModel" => Some(Capability::Bulk),
            _ => None,
        }
    }

    /// Result-only models get row mapping and nothing else.
    pub fn has_table(self) -> bool {
        self != Capability::Result
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    pub ident: syn::Ident,
    /// Field name without any `r#` prefix.
    pub name: String,
    pub ty: syn::Type,
    /// `ty` with one layer of `Option` removed.
    pub inner: syn::Type,
    pub optional: bool,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct ModelDecl {
    pub name: String,
    pub module: Vec<String>,
    pub capability: Capability,
    pub properties: Vec<Property>,
    pub file: PathBuf,
    pub location: Location,
}

impl ModelDecl {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// `crate::a::b::Name`.
    pub fn path(&self) -> String {
        rooted_path(&self.module, &self.name)
    }
}

/// A fieldless enum usable as a model property.
#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    pub module: Vec<String>,
    /// Integer type from `#[repr(..)]`, if any.
    pub repr: Option<String>,
    pub unit_only: bool,
    pub variants: Vec<String>,
}

impl EnumDecl {
    pub fn path(&self) -> String {
        rooted_path(&self.module, &self.name)
    }
}

/// One fn body read as part of a profile.
#[derive(Debug, Clone)]
pub struct ProfileBody {
    pub file: PathBuf,
    pub expr: Expr,
}

#[derive(Debug, Clone)]
pub struct ProfileDecl {
    pub dialect: Dialect,
    /// `None` for a synthesized default profile.
    pub profile: Option<String>,
    /// Bodies of the configuring fn and of dialect-compatible helpers.
    pub bodies: Vec<ProfileBody>,
    pub file: PathBuf,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct DiscoveredModel {
    pub model: ModelDecl,
    /// At most one per dialect, in dialect order.
    pub profiles: Vec<ProfileDecl>,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub models: Vec<DiscoveredModel>,
    pub enums: Vec<EnumDecl>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn discover(sources: &SourceSet, config: &GeneratorConfig) -> Discovery {
    let mut out = Discovery {
        enums: sources.enums.iter().map(enum_decl).collect(),
        ..Discovery::default()
    };

    // struct index -> strongest capability
    let mut capabilities: BTreeMap<usize, Capability> = BTreeMap::new();
    for located in &sources.impls {
        let Some((trait_name, _)) = trait_of(&located.item) else {
            continue;
        };
        let Some(capability) = Capability::from_trait(&trait_name) else {
            continue;
        };
        let location = Location::new(&located.file, located.item.self_ty.span());
        let found = type_segments(&located.item.self_ty)
            .and_then(|segments| find_struct(sources, &segments, &located.module));
        match found {
            Some(index) => {
                let entry = capabilities.entry(index).or_insert(capability);
                *entry = (*entry).max(capability);
            }
            None => {
                let name = type_name(&located.item.self_ty);
                out.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::NotExtensible,
                    &name,
                    location,
                    format!("`{}` implements `{}` but is not a struct declared in this crate", name, trait_name),
                ));
            }
        }
    }

    let mut models: BTreeMap<usize, DiscoveredModel> = BTreeMap::new();
    for (index, capability) in capabilities {
        match model_decl(&sources.structs[index], capability) {
            Ok(model) => {
                models.insert(index, DiscoveredModel { model, profiles: Vec::new() });
            }
            Err(diagnostic) => out.diagnostics.push(*diagnostic),
        }
    }

    for located in &sources.impls {
        let Some((trait_name, args)) = trait_of(&located.item) else {
            continue;
        };
        let dialect = match trait_name.as_str() {
            "SqlServerProfile" => Dialect::SqlServer,
            "PostgresProfile" => Dialect::Postgres,
            _ => continue,
        };
        if args.len() != 1 {
            let profile_name = type_name(&located.item.self_ty);
            out.diagnostics.push(
                Diagnostic::new(
                    DiagnosticKind::InvalidConfiguration,
                    &profile_name,
                    Location::new(&located.file, located.item.self_ty.span()),
                    format!(
                        "`{}` implements `{}` with {} type arguments; it takes exactly one model",
                        profile_name,
                        trait_name,
                        args.len()
                    ),
                )
                .with_dialect(dialect),
            );
            continue;
        }
        let Some(index) = args
            .first()
            .and_then(type_segments)
            .and_then(|segments| find_struct(sources, &segments, &located.module))
        else {
            continue;
        };
        let Some(discovered) = models.get_mut(&index) else {
            continue;
        };
        let profile_name = type_name(&located.item.self_ty);
        let location = Location::new(&located.file, located.item.self_ty.span());
        if let Some(existing) = discovered.profiles.iter().find(|p| p.dialect == dialect) {
            out.diagnostics.push(
                Diagnostic::new(
                    DiagnosticKind::DuplicateProfile,
                    &discovered.model.name,
                    location,
                    format!(
                        "`{}` already has a {} profile (`{}`); `{}` is ignored",
                        discovered.model.name,
                        dialect,
                        existing.profile.as_deref().unwrap_or_default(),
                        profile_name
                    ),
                )
                .with_dialect(dialect),
            );
            continue;
        }
        let mut bodies = fn_bodies(located, None);
        for helper in &sources.impls {
            if helper.item.trait_.is_none() && type_name(&helper.item.self_ty) == profile_name {
                bodies.extend(fn_bodies(helper, Some((dialect, &discovered.model.name))));
            }
        }
        discovered.profiles.push(ProfileDecl {
            dialect,
            profile: Some(profile_name),
            bodies,
            file: located.file.clone(),
            location,
        });
    }

    for discovered in models.values_mut() {
        discovered.profiles.sort_by_key(|p| p.dialect);
        let model = &discovered.model;
        if !discovered.profiles.is_empty() || !model.capability.has_table() {
            continue;
        }
        if config.require_profile {
            out.diagnostics.push(Diagnostic::new(
                DiagnosticKind::MissingProfile,
                &model.name,
                model.location.clone(),
                format!("`{}` is a domain model but no dialect profile configures it", model.name),
            ));
            continue;
        }
        discovered.profiles = config
            .default_dialects
            .iter()
            .map(|&dialect| ProfileDecl {
                dialect,
                profile: None,
                bodies: Vec::new(),
                file: model.file.clone(),
                location: model.location.clone(),
            })
            .collect();
    }

    out.models = models.into_values().collect();
    out.models
        .sort_by(|a, b| (&a.model.name, &a.model.module).cmp(&(&b.model.name, &b.model.module)));
    tracing::debug!(
        models = out.models.len(),
        enums = out.enums.len(),
        diagnostics = out.diagnostics.len(),
        "discovered models"
    );
    out
}

fn rooted_path(module: &[String], name: &str) -> String {
    let mut path = String::from("crate");
    for segment in module {
        path.push_str("::");
        path.push_str(segment);
    }
    path.push_str("::");
    path.push_str(name);
    path
}

/// Trait name and its generic type arguments, for trait impls.
fn trait_of(item: &syn::ItemImpl) -> Option<(String, Vec<syn::Type>)> {
    let (_, path, _) = item.trait_.as_ref()?;
    let last = path.segments.last()?;
    let args = match &last.arguments {
        syn::PathArguments::AngleBracketed(generic) => generic
            .args
            .iter()
            .filter_map(|arg| match arg {
                syn::GenericArgument::Type(ty) => Some(ty.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    Some((last.ident.to_string(), args))
}

fn type_segments(ty: &syn::Type) -> Option<Vec<String>> {
    match ty {
        syn::Type::Path(path) if path.qself.is_none() => {
            Some(path.path.segments.iter().map(|s| s.ident.to_string()).collect())
        }
        syn::Type::Group(group) => type_segments(&group.elem),
        syn::Type::Paren(paren) => type_segments(&paren.elem),
        _ => None,
    }
}

fn type_name(ty: &syn::Type) -> String {
    type_segments(ty)
        .and_then(|mut s| s.pop())
        .unwrap_or_else(|| quote::quote!(#ty).to_string())
}

/// Finds a struct by possibly qualified name, preferring `near` on ties.
fn find_struct(sources: &SourceSet, segments: &[String], near: &[String]) -> Option<usize> {
    let (name, qualifier) = segments.split_last()?;
    let qualifier: Vec<&String> = qualifier
        .iter()
        .filter(|s| !matches!(s.as_str(), "crate" | "self" | "super"))
        .collect();
    let candidates: Vec<usize> = sources
        .structs
        .iter()
        .enumerate()
        .filter(|(_, s)| s.item.ident == name.as_str())
        .filter(|(_, s)| {
            s.module.len() >= qualifier.len()
                && s.module[s.module.len() - qualifier.len()..]
                    .iter()
                    .zip(&qualifier)
                    .all(|(a, b)| a == *b)
        })
        .map(|(i, _)| i)
        .collect();
    match candidates.as_slice() {
        [] => None,
        [only] => Some(*only),
        many => many
            .iter()
            .copied()
            .find(|&i| sources.structs[i].module == near)
            .or_else(|| many.first().copied()),
    }
}

fn reachable(vis: &syn::Visibility) -> bool {
    match vis {
        syn::Visibility::Public(_) => true,
        syn::Visibility::Restricted(restricted) => restricted.path.is_ident("crate"),
        syn::Visibility::Inherited => false,
    }
}

fn model_decl(located: &Located<syn::ItemStruct>, capability: Capability) -> Result<ModelDecl, Box<Diagnostic>> {
    let item = &located.item;
    let name = item.ident.to_string();
    let location = Location::new(&located.file, item.ident.span());
    let not_extensible = |reason: &str| {
        Box::new(Diagnostic::new(
            DiagnosticKind::NotExtensible,
            &name,
            location.clone(),
            format!("`{}` cannot be generated for: {}", name, reason),
        ))
    };

    if !item.generics.params.is_empty() {
        return Err(not_extensible("generic structs are not supported"));
    }
    let at_root = located.module.is_empty();
    if !at_root && !reachable(&item.vis) {
        return Err(not_extensible("the struct must be `pub` or `pub(crate)`"));
    }
    let Fields::Named(named) = &item.fields else {
        return Err(not_extensible("the struct must have named fields"));
    };

    let mut properties = Vec::with_capacity(named.named.len());
    for field in &named.named {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        if !at_root && !reachable(&field.vis) {
            return Err(not_extensible(&format!(
                "field `{}` must be `pub` or `pub(crate)`",
                ident.unraw()
            )));
        }
        let (optional, inner) = match option_inner(&field.ty) {
            Some(inner) => (true, inner.clone()),
            None => (false, field.ty.clone()),
        };
        properties.push(Property {
            name: ident.unraw().to_string(),
            location: Location::new(&located.file, ident.span()),
            ident,
            ty: field.ty.clone(),
            inner,
            optional,
        });
    }

    Ok(ModelDecl {
        name,
        module: located.module.clone(),
        capability,
        properties,
        file: located.file.clone(),
        location,
    })
}

pub(crate) fn option_inner(ty: &syn::Type) -> Option<&syn::Type> {
    let syn::Type::Path(path) = ty else {
        return None;
    };
    let last = path.path.segments.last()?;
    if last.ident != "Option" {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &last.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(inner) if args.args.len() == 1 => Some(inner),
        _ => None,
    }
}

/// Lowered bodies of an impl's fns. With a filter set, helpers whose
/// parameters name another dialect or another model's builder are skipped.
fn fn_bodies(located: &Located<syn::ItemImpl>, filter: Option<(Dialect, &str)>) -> Vec<ProfileBody> {
    located
        .item
        .items
        .iter()
        .filter_map(|item| match item {
            ImplItem::Fn(f) => Some(f),
            _ => None,
        })
        .filter(|f| filter.is_none_or(|(dialect, model)| helper_applies(&f.sig, dialect, model)))
        .map(|f| ProfileBody {
            file: located.file.clone(),
            expr: Expr::lower_block(&f.block),
        })
        .collect()
}

fn helper_applies(sig: &syn::Signature, dialect: Dialect, model: &str) -> bool {
    sig.inputs.iter().all(|input| {
        let syn::FnArg::Typed(typed) = input else {
            return true;
        };
        let ty = &typed.ty;
        let rendered = quote::quote!(#ty).to_string();
        let words: Vec<&str> = rendered
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .collect();
        let other_dialect = match dialect {
            Dialect::SqlServer => "Postgres",
            Dialect::Postgres => "SqlServer",
        };
        let builder_for_other = words.contains(&"ProfileBuilder") && !words.contains(&model);
        !words.contains(&other_dialect) && !builder_for_other
    })
}

fn enum_decl(located: &Located<syn::ItemEnum>) -> EnumDecl {
    let item = &located.item;
    let repr = item
        .attrs
        .iter()
        .filter(|attr| attr.path().is_ident("repr"))
        .filter_map(|attr| {
            attr.parse_args_with(Punctuated::<syn::Ident, Token![,]>::parse_terminated)
                .ok()
        })
        .flatten()
        .map(|ident| ident.to_string())
        .find(|ident| ident.starts_with('i') || ident.starts_with('u'));
    EnumDecl {
        name: item.ident.to_string(),
        module: located.module.clone(),
        repr,
        unit_only: item.variants.iter().all(|v| matches!(v.fields, Fields::Unit)),
        variants: item.variants.iter().map(|v| v.ident.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn sources(code: &str) -> SourceSet {
        let mut set = SourceSet::new();
        set.add_source(Path::new("src/lib.rs"), Vec::new(), code).unwrap();
        set
    }

    fn kinds(discovery: &Discovery) -> Vec<DiagnosticKind> {
        discovery.diagnostics.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn finds_models_and_strongest_capability() {
        let set = sources(
            r#"
            pub struct Order { pub id: i32, pub note: Option<String> }
            impl DomainModel for Order {}
            impl bulkgen::BulkModel for Order {}
            pub struct Summary { pub total: i64 }
            impl ResultModel for Summary {}
            pub struct Plain { pub id: i32 }
            "#,
        );
        let found = discover(&set, &GeneratorConfig::default());
        let names: Vec<_> = found.models.iter().map(|m| m.model.name.as_str()).collect();
        assert_eq!(names, ["Order", "Summary"]);
        assert_eq!(found.models[0].model.capability, Capability::Bulk);
        assert!(found.models[0].model.properties[1].optional);
        assert_eq!(found.models[1].model.capability, Capability::Result);
        assert_eq!(kinds(&found), [DiagnosticKind::MissingProfile]);
    }

    #[test]
    fn rejects_types_generated_code_cannot_reach() {
        let set = sources(
            r#"
            pub struct Pair(pub i32, pub i32);
            impl DomainModel for Pair {}
            pub struct Wrapper<T> { pub inner: T }
            impl<T> ResultModel for Wrapper<T> {}
            impl ResultModel for External {}
            mod inner {
                pub struct Hidden { id: i32 }
                impl ResultModel for Hidden {}
            }
            "#,
        );
        let found = discover(&set, &GeneratorConfig::default());
        assert!(found.models.is_empty());
        assert_eq!(found.diagnostics.len(), 4);
        assert!(kinds(&found).iter().all(|k| *k == DiagnosticKind::NotExtensible));
    }

    #[test]
    fn pairs_profiles_and_reports_duplicates() {
        let set = sources(
            r#"
            pub struct Order { pub id: i32 }
            impl DomainModel for Order {}
            struct OrderProfile;
            impl SqlServerProfile<Order> for OrderProfile {
                fn configure(map: &mut ProfileBuilder<Order, SqlServer>) { map.table("Orders"); }
            }
            impl PostgresProfile<Order> for OrderProfile {
                fn configure(map: &mut ProfileBuilder<Order, Postgres>) { Self::shared_pg(map); }
            }
            impl OrderProfile {
                fn shared_pg(map: &mut ProfileBuilder<Order, Postgres>) { map.schema("app"); }
            }
            struct Other;
            impl SqlServerProfile<Order> for Other {
                fn configure(_map: &mut ProfileBuilder<Order, SqlServer>) {}
            }
            "#,
        );
        let found = discover(&set, &GeneratorConfig::default());
        let profiles = &found.models[0].profiles;
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].dialect, Dialect::SqlServer);
        assert_eq!(profiles[0].profile.as_deref(), Some("OrderProfile"));
        assert_eq!(profiles[0].bodies.len(), 1);
        assert_eq!(profiles[1].bodies.len(), 2);
        assert_eq!(kinds(&found), [DiagnosticKind::DuplicateProfile]);
        assert_eq!(found.diagnostics[0].dialect, Some(Dialect::SqlServer));
    }

    #[test]
    fn profile_traits_take_exactly_one_model() {
        let set = sources(
            r#"
            pub struct Order { pub id: i32 }
            impl DomainModel for Order {}
            pub struct Line { pub id: i32 }
            impl DomainModel for Line {}
            struct Pair;
            impl SqlServerProfile<Order, Line> for Pair {
                fn configure(_map: &mut ProfileBuilder<Order, SqlServer>) {}
            }
            struct Bare;
            impl PostgresProfile for Bare {}
            "#,
        );
        let config = GeneratorConfig {
            require_profile: false,
            default_dialects: vec![Dialect::Postgres],
        };
        let found = discover(&set, &config);
        assert_eq!(
            kinds(&found),
            [DiagnosticKind::InvalidConfiguration, DiagnosticKind::InvalidConfiguration]
        );
        assert_eq!(found.diagnostics[0].model, "Pair");
        assert_eq!(found.diagnostics[0].dialect, Some(Dialect::SqlServer));
        assert_eq!(found.diagnostics[1].dialect, Some(Dialect::Postgres));
        assert!(found.models.iter().all(|m| m.profiles.iter().all(|p| p.profile.is_none())));
    }

    #[test]
    fn synthesizes_default_profiles_when_allowed() {
        let set = sources("pub struct Order { pub id: i32 } impl DomainModel for Order {}");
        let config = GeneratorConfig {
            require_profile: false,
            default_dialects: vec![Dialect::Postgres],
        };
        let found = discover(&set, &config);
        assert!(found.diagnostics.is_empty());
        let profiles = &found.models[0].profiles;
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].dialect, Dialect::Postgres);
        assert!(profiles[0].profile.is_none());
    }

    #[test]
    fn enum_repr_and_shape() {
        let set = sources(
            r#"
            #[derive(Clone, Copy)]
            #[repr(u8)]
            pub enum Status { Open = 1, Closed = 2 }
            pub enum Shape { Circle(f64) }
            "#,
        );
        let found = discover(&set, &GeneratorConfig::default());
        assert_eq!(found.enums[0].repr.as_deref(), Some("u8"));
        assert!(found.enums[0].unit_only);
        assert_eq!(found.enums[0].path(), "crate::Status");
        assert!(!found.enums[1].unit_only);
    }
}

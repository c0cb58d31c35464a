//! Checks a resolved model before any SQL is built for it.

use bulkgen_core::TypeFamily;

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::discovery::ModelDecl;
use crate::resolve::{ResolvedModel, ResolvedProperty, SemanticType};

/// Largest precision either dialect accepts for exact numerics.
const MAX_PRECISION: u8 = 38;

pub fn validate(model: &ModelDecl, resolved: &ResolvedModel) -> Vec<Diagnostic> {
    let dialect = resolved.dialect;
    let mut diagnostics = Vec::new();
    let mut report = |kind: DiagnosticKind, property: &ResolvedProperty, message: String| {
        let location = match kind {
            DiagnosticKind::MissingConfiguration => property.declared_at.clone(),
            _ => property.configured_at.clone(),
        };
        diagnostics.push(
            Diagnostic::new(kind, &model.name, location, message)
                .with_property(&property.name)
                .with_dialect(dialect),
        );
    };

    for property in &resolved.properties {
        if let Some(db_type) = property.db_type.filter(|_| property.explicit_type) {
            if db_type.dialect() != dialect {
                report(
                    DiagnosticKind::InvalidConfiguration,
                    property,
                    format!(
                        "property `{}` of `{}` uses {} `{}` in its {} profile",
                        property.name,
                        model.name,
                        db_type.dialect(),
                        db_type,
                        dialect
                    ),
                );
                continue;
            }
            if db_type.family() != property.semantic.family() {
                report(
                    DiagnosticKind::InvalidConfiguration,
                    property,
                    format!(
                        "property `{}` of `{}` cannot be stored as `{}`",
                        property.name, model.name, db_type
                    ),
                );
                continue;
            }
        }

        let missing = missing_settings(property);
        if !missing.is_empty() {
            report(
                DiagnosticKind::MissingConfiguration,
                property,
                format!(
                    "property `{}` of `{}` needs {} in its {} profile",
                    property.name,
                    model.name,
                    missing.join(", "),
                    dialect
                ),
            );
            continue;
        }

        if let Some(precision) = property.precision.filter(|_| takes_precision(property)) {
            if precision == 0 || precision > MAX_PRECISION {
                report(
                    DiagnosticKind::InvalidConfiguration,
                    property,
                    format!(
                        "precision of `{}` must be between 1 and {}, found {}",
                        property.name, MAX_PRECISION, precision
                    ),
                );
            } else if property.scale.is_some_and(|scale| scale > precision) {
                report(
                    DiagnosticKind::InvalidConfiguration,
                    property,
                    format!("scale of `{}` exceeds its precision", property.name),
                );
            }
        }

        let identity = resolved.identity.contains(&property.name);
        if identity && property.semantic.family() != TypeFamily::Integer {
            report(
                DiagnosticKind::InvalidConfiguration,
                property,
                format!("identity property `{}` must be an integer", property.name),
            );
        }
    }

    if model.capability.has_table() {
        if resolved.keys.is_empty() {
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticKind::MissingKey,
                    &model.name,
                    model.location.clone(),
                    format!(
                        "`{}` has no key: declare one with `key(..)` or add an `id` property",
                        model.name
                    ),
                )
                .with_dialect(dialect),
            );
        } else if resolved.keys.iter().all(|k| resolved.identity.contains(k)) {
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticKind::UpsertInfeasible,
                    &model.name,
                    model.location.clone(),
                    format!(
                        "every key of `{}` is store-assigned, so no {} upsert is generated",
                        model.name, dialect
                    ),
                )
                .with_dialect(dialect),
            );
        }
    }

    diagnostics
}

fn takes_precision(property: &ResolvedProperty) -> bool {
    property.db_type.is_some_and(|t| t.takes_precision())
}

/// Settings an ambiguous property still lacks.
fn missing_settings(property: &ResolvedProperty) -> Vec<&'static str> {
    let mut missing = Vec::new();
    match property.semantic {
        SemanticType::String | SemanticType::Bytes => {
            if property.db_type.is_none() {
                missing.push("a dialect type");
            }
            let needs_size = property.db_type.is_none_or(|t| t.takes_size());
            if needs_size && property.size.is_none() {
                missing.push("a size");
            }
        }
        SemanticType::Decimal => {
            if property.db_type.is_none() {
                missing.push("a dialect type");
            }
            if property.precision.is_none() {
                missing.push("a precision");
            }
            if property.scale.is_none() {
                missing.push("a scale");
            }
        }
        _ => {}
    }
    missing
}

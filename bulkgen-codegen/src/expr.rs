//! A reduced expression tree for profile bodies and constant initializers.
//!
//! Only the shapes the profile parser and the constant folder understand are
//! kept; everything else becomes [`ExprKind::Opaque`] with its span intact so
//! diagnostics can still point at it.

use proc_macro2::Span;
use syn::spanned::Spanned;

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Str(String),
    Int(u128),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Lit(Lit),
    /// Path segments, e.g. `["SqlServerType", "NVarChar"]`.
    Path(Vec<String>),
    Field {
        base: Box<Expr>,
        member: String,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Closure {
        params: Vec<String>,
        body: Box<Expr>,
    },
    Reference(Box<Expr>),
    Neg(Box<Expr>),
    /// Macro invocation with its raw token text.
    Macro {
        path: Vec<String>,
        tokens: String,
    },
    /// Statements of a block, if, or loop body, in source order.
    Block(Vec<Expr>),
    Opaque,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

/// One link of a method chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainCall<'a> {
    pub method: &'a str,
    pub args: &'a [Expr],
    pub span: Span,
}

impl Expr {
    fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn lower(expr: &syn::Expr) -> Self {
        let span = expr.span();
        match expr {
            syn::Expr::Lit(lit) => lower_lit(&lit.lit, span),
            syn::Expr::Path(path) => Self::new(ExprKind::Path(path_segments(&path.path)), span),
            syn::Expr::Paren(inner) => Self::lower(&inner.expr),
            syn::Expr::Group(inner) => Self::lower(&inner.expr),
            syn::Expr::Field(field) => Self::new(
                ExprKind::Field {
                    base: Box::new(Self::lower(&field.base)),
                    member: match &field.member {
                        syn::Member::Named(ident) => ident.to_string(),
                        syn::Member::Unnamed(index) => index.index.to_string(),
                    },
                },
                span,
            ),
            syn::Expr::MethodCall(call) => Self::new(
                ExprKind::MethodCall {
                    receiver: Box::new(Self::lower(&call.receiver)),
                    method: call.method.to_string(),
                    args: call.args.iter().map(Self::lower).collect(),
                },
                // Point at the method name rather than the whole chain.
                call.method.span(),
            ),
            syn::Expr::Call(call) => Self::new(
                ExprKind::Call {
                    func: Box::new(Self::lower(&call.func)),
                    args: call.args.iter().map(Self::lower).collect(),
                },
                span,
            ),
            syn::Expr::Closure(closure) => Self::new(
                ExprKind::Closure {
                    params: closure.inputs.iter().filter_map(pat_ident).collect(),
                    body: Box::new(Self::lower(&closure.body)),
                },
                span,
            ),
            syn::Expr::Reference(reference) => {
                Self::new(ExprKind::Reference(Box::new(Self::lower(&reference.expr))), span)
            }
            syn::Expr::Unary(unary) if matches!(unary.op, syn::UnOp::Neg(_)) => {
                Self::new(ExprKind::Neg(Box::new(Self::lower(&unary.expr))), span)
            }
            syn::Expr::Macro(mac) => Self::new(
                ExprKind::Macro {
                    path: path_segments(&mac.mac.path),
                    tokens: mac.mac.tokens.to_string(),
                },
                span,
            ),
            syn::Expr::Block(block) => Self::lower_block(&block.block),
            syn::Expr::Unsafe(block) => Self::lower_block(&block.block),
            syn::Expr::If(expr_if) => {
                let mut stmts = vec![Self::lower(&expr_if.cond)];
                stmts.extend(Self::lower_block(&expr_if.then_branch).into_block());
                if let Some((_, other)) = &expr_if.else_branch {
                    stmts.push(Self::lower(other));
                }
                Self::new(ExprKind::Block(stmts), span)
            }
            syn::Expr::ForLoop(for_loop) => Self::lower_block(&for_loop.body),
            _ => Self::new(ExprKind::Opaque, span),
        }
    }

    /// Lowers a block, keeping `let` initializers and expression statements.
    pub fn lower_block(block: &syn::Block) -> Self {
        let stmts = block
            .stmts
            .iter()
            .filter_map(|stmt| match stmt {
                syn::Stmt::Expr(expr, _) => Some(Self::lower(expr)),
                syn::Stmt::Local(local) => local.init.as_ref().map(|init| Self::lower(&init.expr)),
                syn::Stmt::Macro(mac) => Some(Self::new(
                    ExprKind::Macro {
                        path: path_segments(&mac.mac.path),
                        tokens: mac.mac.tokens.to_string(),
                    },
                    mac.span(),
                )),
                syn::Stmt::Item(_) => None,
            })
            .collect();
        Self::new(ExprKind::Block(stmts), block.span())
    }

    fn into_block(self) -> Vec<Expr> {
        match self.kind {
            ExprKind::Block(stmts) => stmts,
            _ => vec![self],
        }
    }

    /// Splits `base.a(..).b(..)` into `base` and the calls in source order.
    pub fn unchain(&self) -> (&Expr, Vec<ChainCall<'_>>) {
        let mut calls = Vec::new();
        let mut current = self;
        while let ExprKind::MethodCall {
            receiver,
            method,
            args,
        } = &current.kind
        {
            calls.push(ChainCall {
                method,
                args,
                span: current.span,
            });
            current = receiver;
        }
        calls.reverse();
        (current, calls)
    }

    /// Visits every outermost method chain in statement position, descending
    /// into blocks and closure bodies but not into the receivers of a chain.
    pub fn for_each_chain<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        match &self.kind {
            ExprKind::MethodCall { .. } => {
                visit(self);
                let (base, calls) = self.unchain();
                base.for_each_chain(visit);
                for call in calls {
                    for arg in call.args {
                        arg.for_each_chain(visit);
                    }
                }
            }
            ExprKind::Block(stmts) => stmts.iter().for_each(|s| s.for_each_chain(visit)),
            ExprKind::Closure { body, .. } => body.for_each_chain(visit),
            ExprKind::Call { func, args } => {
                func.for_each_chain(visit);
                args.iter().for_each(|a| a.for_each_chain(visit));
            }
            ExprKind::Reference(inner) | ExprKind::Neg(inner) => inner.for_each_chain(visit),
            ExprKind::Field { base, .. } => base.for_each_chain(visit),
            ExprKind::Lit(_) | ExprKind::Path(_) | ExprKind::Macro { .. } | ExprKind::Opaque => {}
        }
    }

    /// `|m| &m.field` or `|m| m.field`; returns the field name.
    pub fn selected_field(&self) -> Option<&str> {
        let ExprKind::Closure { params, body } = &self.kind else {
            return None;
        };
        let [param] = params.as_slice() else {
            return None;
        };
        let body = match &body.kind {
            ExprKind::Reference(inner) => inner,
            _ => body,
        };
        let ExprKind::Field { base, member } = &body.kind else {
            return None;
        };
        match &base.kind {
            ExprKind::Path(segments) if segments.len() == 1 && &segments[0] == param => Some(member.as_str()),
            _ => None,
        }
    }
}

fn lower_lit(lit: &syn::Lit, span: Span) -> Expr {
    let kind = match lit {
        syn::Lit::Str(s) => ExprKind::Lit(Lit::Str(s.value())),
        syn::Lit::Int(i) => match i.base10_parse::<u128>() {
            Ok(v) => ExprKind::Lit(Lit::Int(v)),
            Err(_) => ExprKind::Opaque,
        },
        syn::Lit::Float(f) => match f.base10_parse::<f64>() {
            Ok(v) => ExprKind::Lit(Lit::Float(v)),
            Err(_) => ExprKind::Opaque,
        },
        syn::Lit::Bool(b) => ExprKind::Lit(Lit::Bool(b.value)),
        _ => ExprKind::Opaque,
    };
    Expr::new(kind, span)
}

pub(crate) fn path_segments(path: &syn::Path) -> Vec<String> {
    path.segments.iter().map(|s| s.ident.to_string()).collect()
}

fn pat_ident(pat: &syn::Pat) -> Option<String> {
    match pat {
        syn::Pat::Ident(ident) => Some(ident.ident.to_string()),
        syn::Pat::Type(typed) => pat_ident(&typed.pat),
        syn::Pat::Wild(_) => Some("_".to_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn unchain_orders_calls_from_base() {
        let expr: syn::Expr = parse_quote!(map.rule_for(|m| &m.name).nvarchar(100).required());
        let lowered = Expr::lower(&expr);
        let (base, calls) = lowered.unchain();
        assert!(matches!(&base.kind, ExprKind::Path(p) if p == &["map"]));
        let names: Vec<_> = calls.iter().map(|c| c.method).collect();
        assert_eq!(names, ["rule_for", "nvarchar", "required"]);
        assert!(matches!(calls[1].args[0].kind, ExprKind::Lit(Lit::Int(100))));
    }

    #[test]
    fn selector_shapes() {
        let plain: syn::Expr = parse_quote!(|m| &m.name);
        assert_eq!(Expr::lower(&plain).selected_field(), Some("name"));
        let typed: syn::Expr = parse_quote!(|o: &Order| o.total);
        assert_eq!(Expr::lower(&typed).selected_field(), Some("total"));
        let other: syn::Expr = parse_quote!(|m| &other.name);
        assert_eq!(Expr::lower(&other).selected_field(), None);
        let call: syn::Expr = parse_quote!(|m| m.name());
        assert_eq!(Expr::lower(&call).selected_field(), None);
    }

    #[test]
    fn block_keeps_let_initializers() {
        let block: syn::Block = parse_quote!({
            let rule = map.rule_for(|m| &m.name);
            rule.size(10);
            if WIDE {
                map.rule_for(|m| &m.note).nvarchar_max();
            }
        });
        let lowered = Expr::lower_block(&block);
        let mut methods = Vec::new();
        lowered.for_each_chain(&mut |chain| {
            let (_, calls) = chain.unchain();
            methods.extend(calls.iter().map(|c| c.method.to_owned()));
        });
        assert_eq!(methods, ["rule_for", "size", "rule_for", "nvarchar_max"]);
    }

    #[test]
    fn unsupported_expressions_are_opaque() {
        let expr: syn::Expr = parse_quote!(len * 2);
        assert!(matches!(Expr::lower(&expr).kind, ExprKind::Opaque));
    }
}

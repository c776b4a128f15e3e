//! Compiled expressions as seen by the report pipeline
//!
//! Stages never parse expression text. They receive objects implementing
//! [`Expr`] and evaluate them against a [`Scope`]: the report context plus
//! the posting, account or transaction being looked at. Closure backed
//! expressions ([`FnExpr`]) cover the built-in defaults in [`functions`].

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::account::AccountId;
use crate::context::ReportContext;
use crate::posting::PostId;
use crate::transaction::XactId;
use crate::value::{Value, ValueError};

pub mod functions;
pub mod predicate;

pub use predicate::{Predicate, SortKey, SortKeys};

/// Error types for expression evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("Expression '{0}' needs a posting or account to evaluate")]
    NoTarget(String),
    #[error("Invalid pattern: {0}")]
    Pattern(String),
    #[error("Runtime error: {0}")]
    Calc(String),
}

impl From<regex::Error> for ExprError {
    fn from(err: regex::Error) -> Self {
        ExprError::Pattern(err.to_string())
    }
}

/// Result type for expression operations
pub type ExprResult<T> = Result<T, ExprError>;

/// What an expression is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeTarget {
    Global,
    Post(PostId),
    Account(AccountId),
    Xact(XactId),
}

pub struct Scope<'a> {
    pub context: &'a ReportContext,
    pub target: ScopeTarget,
}

impl<'a> Scope<'a> {
    pub fn global(context: &'a ReportContext) -> Self {
        Self { context, target: ScopeTarget::Global }
    }

    pub fn post(context: &'a ReportContext, post: PostId) -> Self {
        Self { context, target: ScopeTarget::Post(post) }
    }

    pub fn account(context: &'a ReportContext, account: AccountId) -> Self {
        Self { context, target: ScopeTarget::Account(account) }
    }

    pub fn xact(context: &'a ReportContext, xact: XactId) -> Self {
        Self { context, target: ScopeTarget::Xact(xact) }
    }

    pub fn post_id(&self) -> Option<PostId> {
        match self.target {
            ScopeTarget::Post(post) => Some(post),
            _ => None,
        }
    }
}

/// A compiled expression
pub trait Expr {
    fn calc(&self, scope: &Scope<'_>) -> ExprResult<Value>;

    /// Source text, for diagnostics
    fn text(&self) -> &str;
}

pub type ExprRef = Rc<dyn Expr>;

impl fmt::Debug for dyn Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({})", self.text())
    }
}

type CalcFn = dyn Fn(&Scope<'_>) -> ExprResult<Value>;

/// Expression backed by a closure
pub struct FnExpr {
    text: String,
    func: Box<CalcFn>,
}

impl FnExpr {
    pub fn new<F>(text: impl Into<String>, func: F) -> ExprRef
    where
        F: Fn(&Scope<'_>) -> ExprResult<Value> + 'static,
    {
        Rc::new(Self { text: text.into(), func: Box::new(func) })
    }
}

impl Expr for FnExpr {
    fn calc(&self, scope: &Scope<'_>) -> ExprResult<Value> {
        (self.func)(scope)
    }

    fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Debug for FnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExpr").field("text", &self.text).finish()
    }
}

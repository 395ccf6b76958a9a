//! Before/after hooks around every inbound invocation.

use std::any::Any;

use crate::object::Failure;
use crate::object::MethodSignature;
use crate::object::ObjectRef;
use crate::object::Value;

/// Observes inbound invocations on a connection.
///
/// For synchronized methods both hooks run inside the target's monitor, so a
/// listener sees their before/after pairs in true execution order. Other
/// methods get no ordering guarantee relative to each other.
pub trait InvocationListener: Send + Sync + 'static {
    /// Handed back to `after_invocation` for the same call.
    type Token: Send + 'static;

    /// Called before `method` runs on `target`, the object exported as `target_id`.
    fn before_invocation(
        &self,
        target: &ObjectRef,
        target_id: u64,
        method: &MethodSignature,
        args: &[Value],
    ) -> Self::Token;

    fn after_invocation(&self, token: Self::Token, outcome: Result<&Value, &Failure>);
}

type Token = Box<dyn Any + Send>;

/// Object-safe form of `InvocationListener`, stored by the connection.
pub(crate) trait ErasedListener: Send + Sync + 'static {
    fn before(&self, target: &ObjectRef, target_id: u64, method: &MethodSignature, args: &[Value]) -> Token;

    fn after(&self, token: Token, outcome: Result<&Value, &Failure>);
}

impl<L: InvocationListener> ErasedListener for L {
    fn before(&self, target: &ObjectRef, target_id: u64, method: &MethodSignature, args: &[Value]) -> Token {
        Box::new(self.before_invocation(target, target_id, method, args))
    }

    fn after(&self, token: Token, outcome: Result<&Value, &Failure>) {
        if let Ok(token) = token.downcast::<L::Token>() {
            self.after_invocation(*token, outcome);
        }
    }
}

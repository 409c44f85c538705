use std::fmt;

use crate::proto::{InnerTask, MethodShape};

/// A remote method known only by name and call shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub service: String,
    pub method: String,
    pub shape: MethodShape,
}

impl MethodDescriptor {
    pub fn new(service: impl Into<String>, method: impl Into<String>, shape: MethodShape) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            shape,
        }
    }

    /// Describe the method addressed by `task`.
    ///
    /// Returns `Err` with the raw value when the shape is not a known variant.
    pub fn from_task(task: &InnerTask) -> Result<Self, i32> {
        let shape = MethodShape::try_from(task.method_shape).map_err(|_| task.method_shape)?;
        Ok(Self::new(&task.service_name, &task.method_name, shape))
    }

    /// gRPC request path, `/{service}/{method}`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.path(), self.shape)
    }
}

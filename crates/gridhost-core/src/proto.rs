//! Wire messages exchanged with the dispatcher and carried inside tasks.
//!
//! Declared by hand with prost derives so the crate builds without protoc.
//! Field numbers are part of the contract: never reuse or renumber them.

/// Status code for a successful inner result.
pub const STATUS_SUCCESS: i32 = 0;
/// Status code for a failed inner result.
pub const STATUS_FAILURE: i32 = 1;

pub const GET_WRAPPED_TASK_PATH: &str = "/gridhost.v1.Dispatcher/GetWrappedTask";
pub const SEND_RESULT_PATH: &str = "/gridhost.v1.Dispatcher/SendResult";

/// Session lifecycle signal attached to every pulled task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SessionState {
    Running = 0,
    TempNoTask = 1,
    EndTask = 2,
}

/// Streaming topology of the remote method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MethodShape {
    Unary = 0,
    ClientStream = 1,
    ServerStream = 2,
    DuplexStream = 3,
}

/// What the dispatcher should do with the task after this report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TaskOutcome {
    Finished = 0,
    Requeue = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetTaskRequest {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
}

/// Envelope handed out by the dispatcher.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WrappedTask {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub task_id: ::prost::alloc::string::String,
    #[prost(enumeration = "SessionState", tag = "3")]
    pub session_state: i32,
    /// Encoded [`InnerTask`].
    #[prost(bytes = "bytes", tag = "4")]
    pub serialized_inner_task: ::prost::bytes::Bytes,
}

/// Fully addressed remote call.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InnerTask {
    #[prost(string, tag = "1")]
    pub service_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub method_name: ::prost::alloc::string::String,
    #[prost(enumeration = "MethodShape", tag = "3")]
    pub method_shape: i32,
    #[prost(bytes = "bytes", tag = "4")]
    pub payload: ::prost::bytes::Bytes,
    #[prost(string, tag = "5")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub client_id: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub message_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InnerResult {
    #[prost(bytes = "bytes", tag = "1")]
    pub payload: ::prost::bytes::Bytes,
    #[prost(int32, tag = "2")]
    pub status_code: i32,
    #[prost(string, tag = "3")]
    pub status_detail: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub client_id: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub message_id: ::prost::alloc::string::String,
}

/// Result sent back to the dispatcher for one task.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultReport {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub task_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub client_id: ::prost::alloc::string::String,
    #[prost(enumeration = "TaskOutcome", tag = "4")]
    pub task_outcome: i32,
    /// Encoded [`InnerResult`].
    #[prost(bytes = "bytes", tag = "5")]
    pub serialized_inner_result: ::prost::bytes::Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Ack {}

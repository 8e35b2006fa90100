// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 camipc contributors
//
// Cross-process request/response broker for sandboxed camera
// hardware-control services. A camera-stack client drives stateful
// 3A / ISP-tuning / noise-reduction engines running in a separate
// process: arguments cross in fixed POD structs inside dedicated
// shared-memory channels, buffers cross as registry handles, and a
// per-group worker pool serializes same-resource traffic on the server.

pub mod shm_name;

mod shm;
pub use shm::ShmSegment;

mod error;
pub use error::{status, IpcError, Result};

mod registry;
pub use registry::{BufferHandle, BufferRegistry, ShmInfo, NO_BUFFER};

mod meta;
pub use meta::{Flatten, MetaValue, Metadata};

mod channel;
pub use channel::{Channel, ChannelDesc, ChannelSet, ParamStruct, ParamView};

pub mod proto;

pub mod engine;

mod dispatcher;
pub use dispatcher::{CompletionFn, Dispatcher, Handler};

mod transport;
pub use transport::{LoopbackTransport, Transport};

mod server;
pub use server::{Hal3aServer, NotifyRelay, SwnrServer};

mod client;
pub use client::{Hal3aClient, Hal3aTuningBuf, LceBuf, SwnrClient};

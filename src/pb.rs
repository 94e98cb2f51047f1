//! Wire types for the `pcbook` gRPC services.
//!
//! Messages are plain prost structs (standard protobuf wire format); the
//! service traits, servers and clients are generated by `build.rs`. Both
//! mirror the contract in `proto/pcbook.proto`.

use serde::{Deserialize, Serialize};

/// Memory size expressed as a value and a unit.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Memory {
    #[prost(uint64, tag = "1")]
    pub value: u64,
    #[prost(enumeration = "memory::Unit", tag = "2")]
    pub unit: i32,
}

/// Nested types for [`Memory`].
pub mod memory {
    /// Unit of a [`super::Memory`] value.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum Unit {
        Unknown = 0,
        Bit = 1,
        Byte = 2,
        Kilobyte = 3,
        Megabyte = 4,
        Gigabyte = 5,
        Terabyte = 6,
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Cpu {
    #[prost(string, tag = "1")]
    pub brand: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(uint32, tag = "3")]
    pub number_cores: u32,
    #[prost(uint32, tag = "4")]
    pub number_threads: u32,
    #[prost(double, tag = "5")]
    pub min_ghz: f64,
    #[prost(double, tag = "6")]
    pub max_ghz: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Gpu {
    #[prost(string, tag = "1")]
    pub brand: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(double, tag = "3")]
    pub min_ghz: f64,
    #[prost(double, tag = "4")]
    pub max_ghz: f64,
    #[prost(message, optional, tag = "5")]
    pub memory: Option<Memory>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Storage {
    #[prost(enumeration = "storage::Driver", tag = "1")]
    pub driver: i32,
    #[prost(message, optional, tag = "2")]
    pub memory: Option<Memory>,
}

/// Nested types for [`Storage`].
pub mod storage {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum Driver {
        Unknown = 0,
        Hdd = 1,
        Ssd = 2,
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Screen {
    #[prost(float, tag = "1")]
    pub size_inch: f32,
    #[prost(message, optional, tag = "2")]
    pub resolution: Option<screen::Resolution>,
    #[prost(enumeration = "screen::Panel", tag = "3")]
    pub panel: i32,
    #[prost(bool, tag = "4")]
    pub multitouch: bool,
}

/// Nested types for [`Screen`].
pub mod screen {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Resolution {
        #[prost(uint32, tag = "1")]
        pub width: u32,
        #[prost(uint32, tag = "2")]
        pub height: u32,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum Panel {
        Unknown = 0,
        Ips = 1,
        Oled = 2,
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Keyboard {
    #[prost(enumeration = "keyboard::Layout", tag = "1")]
    pub layout: i32,
    #[prost(bool, tag = "2")]
    pub backlit: bool,
}

/// Nested types for [`Keyboard`].
pub mod keyboard {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum Layout {
        Unknown = 0,
        Qwerty = 1,
        Qwertz = 2,
        Azerty = 3,
    }
}

/// A catalog record.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Laptop {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub brand: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(message, optional, tag = "4")]
    pub cpu: Option<Cpu>,
    #[prost(message, optional, tag = "5")]
    pub ram: Option<Memory>,
    #[prost(message, repeated, tag = "6")]
    pub gpus: Vec<Gpu>,
    #[prost(message, repeated, tag = "7")]
    pub storages: Vec<Storage>,
    #[prost(message, optional, tag = "8")]
    pub screen: Option<Screen>,
    #[prost(message, optional, tag = "9")]
    pub keyboard: Option<Keyboard>,
    #[prost(oneof = "laptop::Weight", tags = "10, 11")]
    pub weight: Option<laptop::Weight>,
    #[prost(uint32, tag = "12")]
    pub price: u32,
    #[prost(uint32, tag = "13")]
    pub release_year: u32,
    #[prost(message, optional, tag = "14")]
    pub updated_at: Option<prost_types::Timestamp>,
}

/// Nested types for [`Laptop`].
pub mod laptop {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Weight {
        #[prost(double, tag = "10")]
        WeightKg(f64),
        #[prost(double, tag = "11")]
        WeightLb(f64),
    }
}

/// Conjunctive search predicate.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Filter {
    #[prost(uint32, tag = "1")]
    pub max_price: u32,
    #[prost(uint32, tag = "2")]
    pub min_cpu_cores: u32,
    #[prost(double, tag = "3")]
    pub min_cpu_ghz: f64,
    #[prost(message, optional, tag = "4")]
    pub min_ram: Option<Memory>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateLaptopRequest {
    #[prost(message, optional, tag = "1")]
    pub laptop: Option<Laptop>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateLaptopResponse {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SearchLaptopRequest {
    #[prost(message, optional, tag = "1")]
    pub filter: Option<Filter>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SearchLaptopResponse {
    #[prost(message, optional, tag = "1")]
    pub laptop: Option<Laptop>,
}

/// Metadata carried by the first message of an image upload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ImageInfo {
    #[prost(string, tag = "1")]
    pub laptop_id: String,
    #[prost(string, tag = "2")]
    pub image_type: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UploadImageRequest {
    #[prost(oneof = "upload_image_request::Data", tags = "1, 2")]
    pub data: Option<upload_image_request::Data>,
}

/// Nested types for [`UploadImageRequest`].
pub mod upload_image_request {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Data {
        #[prost(message, tag = "1")]
        Info(super::ImageInfo),
        #[prost(bytes, tag = "2")]
        ChunkData(Vec<u8>),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UploadImageResponse {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(uint32, tag = "2")]
    pub size: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RateLaptopRequest {
    #[prost(string, tag = "1")]
    pub laptop_id: String,
    #[prost(double, tag = "2")]
    pub score: f64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RateLaptopResponse {
    #[prost(string, tag = "1")]
    pub laptop_id: String,
    #[prost(uint32, tag = "2")]
    pub rated_count: u32,
    #[prost(double, tag = "3")]
    pub average_score: f64,
}

/// Usage of a memory-like resource (RAM or disk), in gigabytes.
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct MemoryUsage {
    #[prost(double, tag = "1")]
    pub total_memory: f64,
    #[prost(double, tag = "2")]
    pub current_memory: f64,
    #[prost(double, tag = "3")]
    pub usage: f64,
}

/// Network byte deltas over one sampling window.
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct Network {
    #[prost(uint64, tag = "1")]
    pub rx: u64,
    #[prost(uint64, tag = "2")]
    pub tx: u64,
}

/// One telemetry snapshot taken on a device.
#[derive(Clone, PartialEq, Serialize, Deserialize, prost::Message)]
pub struct LaptopInfo {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub id: String,
    #[prost(uint32, tag = "2")]
    #[serde(default)]
    pub battery: u32,
    #[prost(double, tag = "3")]
    #[serde(default)]
    pub cpu_usage: f64,
    #[prost(message, optional, tag = "4")]
    #[serde(default)]
    pub ram: Option<MemoryUsage>,
    #[prost(message, optional, tag = "5")]
    #[serde(default)]
    pub storage: Option<MemoryUsage>,
    #[prost(message, optional, tag = "6")]
    #[serde(default)]
    pub network: Option<Network>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SendLaptopInfoRequest {
    #[prost(message, optional, tag = "1")]
    pub laptop: Option<LaptopInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SendLaptopInfoResponse {
    #[prost(string, tag = "1")]
    pub msg: String,
    #[prost(uint32, tag = "2")]
    pub received: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginRequest {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub password: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginResponse {
    #[prost(string, tag = "1")]
    pub access_token: String,
}

include!(concat!(env!("OUT_DIR"), "/pcbook.LaptopService.rs"));
include!(concat!(env!("OUT_DIR"), "/pcbook.AuthService.rs"));

pub use auth_service_client::AuthServiceClient;
pub use auth_service_server::{AuthService, AuthServiceServer};
pub use laptop_service_client::LaptopServiceClient;
pub use laptop_service_server::{LaptopService, LaptopServiceServer};

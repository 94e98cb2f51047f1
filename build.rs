//! Generates the tonic service stubs for `pcbook.LaptopService` and
//! `pcbook.AuthService`.
//!
//! Message types are hand-written prost structs in `src/pb.rs`, so the stubs
//! are described with `tonic_build::manual` and no `protoc` is needed.

use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic::codec::ProstCodec";

fn method(name: &str, route: &str, input: &str, output: &str) -> tonic_build::manual::MethodBuilder {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::pb::{input}"))
        .output_type(format!("crate::pb::{output}"))
        .codec_path(CODEC)
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/pcbook.proto");

    let laptop_service = Service::builder()
        .name("LaptopService")
        .package("pcbook")
        .method(
            method(
                "create_laptop",
                "CreateLaptop",
                "CreateLaptopRequest",
                "CreateLaptopResponse",
            )
            .build(),
        )
        .method(
            method(
                "search_laptop",
                "SearchLaptop",
                "SearchLaptopRequest",
                "SearchLaptopResponse",
            )
            .server_streaming()
            .build(),
        )
        .method(
            method(
                "upload_image",
                "UploadImage",
                "UploadImageRequest",
                "UploadImageResponse",
            )
            .client_streaming()
            .build(),
        )
        .method(
            method(
                "rate_laptop",
                "RateLaptop",
                "RateLaptopRequest",
                "RateLaptopResponse",
            )
            .client_streaming()
            .server_streaming()
            .build(),
        )
        .method(
            method(
                "send_laptop_info",
                "SendLaptopInfo",
                "SendLaptopInfoRequest",
                "SendLaptopInfoResponse",
            )
            .client_streaming()
            .build(),
        )
        .build();

    let auth_service = Service::builder()
        .name("AuthService")
        .package("pcbook")
        .method(method("login", "Login", "LoginRequest", "LoginResponse").build())
        .build();

    Builder::new().compile(&[laptop_service, auth_service]);
}

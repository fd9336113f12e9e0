mod http;

pub use http::ReqwestTransport;

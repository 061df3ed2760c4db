//! Authentication utilities

mod jwt;

pub use jwt::{Claims, JwtVerifier};

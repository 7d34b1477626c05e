//! Share link formatting and QR rendering
//!
//! The URI layout is fixed by the client apps that import it; every query
//! parameter below is load-bearing.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::Luma;
use qrcode::QrCode;
use thiserror::Error;
use uuid::Uuid;

use crate::INBOUND_PORT;

/// QR rendering errors
#[derive(Debug, Error)]
pub enum QrEncodeError {
    #[error("QR encoding failed: {0}")]
    Qr(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Format the connection URI for one client credential.
pub fn vless_link(
    client_id: &Uuid,
    host: &str,
    mask_domain: &str,
    public_key: &str,
    proxy_name: &str,
) -> String {
    format!(
        "vless://{client_id}@{host}:{INBOUND_PORT}/?encryption=none&type=tcp&sni={mask_domain}&fp=chrome&security=reality&alpn=h2&flow=xtls-rprx-vision&pbk={public_key}&packetEncoding=xudp#{proxy_name}"
    )
}

/// Render a URI as a base64-encoded PNG QR code.
pub fn qr_png_base64(text: &str) -> Result<String, QrEncodeError> {
    let code = QrCode::new(text.as_bytes())?;
    let image = code.render::<Luma<u8>>().min_dimensions(220, 220).build();

    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(image)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;

    Ok(BASE64.encode(&png))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_has_fixed_layout() {
        let id = Uuid::parse_str("7f8ec1f0-63a1-4b11-9f52-7a2f9c70e3d4").unwrap();
        let link = vless_link(&id, "203.0.113.7", "cdn.example.com", "mK9bTf1yHw5eR7dNZs6uLa", "edge-1");

        assert_eq!(
            link,
            "vless://7f8ec1f0-63a1-4b11-9f52-7a2f9c70e3d4@203.0.113.7:443/?encryption=none&type=tcp&sni=cdn.example.com&fp=chrome&security=reality&alpn=h2&flow=xtls-rprx-vision&pbk=mK9bTf1yHw5eR7dNZs6uLa&packetEncoding=xudp#edge-1"
        );
        assert!(link.starts_with("vless://"));
        assert!(link.contains("&security=reality&"));
    }

    #[test]
    fn qr_is_valid_base64_png() {
        let encoded = qr_png_base64("vless://test").unwrap();
        let bytes = BASE64.decode(encoded.as_bytes()).unwrap();
        // PNG signature
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }
}

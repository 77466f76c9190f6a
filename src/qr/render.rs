use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{GrayImage, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};

use crate::core::FiscalError;

/// Pixels per QR module.
pub const MODULE_SIZE: u32 = 4;
/// Quiet zone width, in modules.
pub const BORDER_MODULES: u32 = 2;

/// Encode the QR string as a PNG (error correction M, 4px modules, 2-module border).
pub fn render_qr_png(payload: &str) -> Result<Vec<u8>, FiscalError> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
        .map_err(|e| FiscalError::Validation(format!("cannot encode QR payload: {e}")))?;

    let width = code.width() as u32;
    let side = (width + 2 * BORDER_MODULES) * MODULE_SIZE;
    let mut img = GrayImage::from_pixel(side, side, Luma([255]));

    for (i, color) in code.to_colors().into_iter().enumerate() {
        if color != Color::Dark {
            continue;
        }
        let mx = i as u32 % width + BORDER_MODULES;
        let my = i as u32 / width + BORDER_MODULES;
        for dy in 0..MODULE_SIZE {
            for dx in 0..MODULE_SIZE {
                img.put_pixel(mx * MODULE_SIZE + dx, my * MODULE_SIZE + dy, Luma([0]));
            }
        }
    }

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| FiscalError::Validation(format!("cannot write QR image: {e}")))?;
    Ok(buf.into_inner())
}

/// `data:image/png;base64,...` form for embedding in HTML prints.
pub fn qr_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = "A:501442600*B:999999990*C:PT*D:FT*E:N*F:20240315*G:AT7B3C9-1*H:PT*I1:0.00*I2:0.00*I3:0.00*I4:0.00*I5:0.00*I6:100.00*I7:23.00*I8:0.00*I9:0.00*N:0.00*O:23.00*P:123.00*Q:0J7X*R:9999";

    #[test]
    fn renders_png_with_fixed_geometry() {
        let png = render_qr_png(PAYLOAD).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let img = image::load_from_memory(&png).unwrap().to_luma8();
        let width = QrCode::with_error_correction_level(PAYLOAD, EcLevel::M)
            .unwrap()
            .width() as u32;
        assert_eq!(img.width(), (width + 4) * 4);
        assert_eq!(img.width(), img.height());
        // quiet zone is white, finder pattern corner is dark
        assert_eq!(img.get_pixel(0, 0), &Luma([255]));
        assert_eq!(img.get_pixel(8, 8), &Luma([0]));
    }

    #[test]
    fn rendering_is_deterministic() {
        assert_eq!(render_qr_png(PAYLOAD).unwrap(), render_qr_png(PAYLOAD).unwrap());
    }

    #[test]
    fn data_url_prefix() {
        let url = qr_data_url(&[1, 2, 3]);
        assert_eq!(url, "data:image/png;base64,AQID");
    }
}

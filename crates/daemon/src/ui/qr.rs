//! QR Code generation for the share URL.
//!
//! This module renders the address peers open in their browser, either for
//! the terminal using Unicode block characters or as a PNG image.

use std::io::Cursor;
use std::path::Path;

use image::{ImageBuffer, Luma};
use qrcode::{Color, QrCode};

/// QR code module size in pixels for PNG output.
const PNG_MODULE_SIZE: u32 = 8;

/// Quiet zone (border) size in modules for PNG output.
const PNG_QUIET_ZONE: u32 = 4;

/// Quiet zone size in characters for terminal output.
const TERMINAL_QUIET_ZONE: usize = 4;

/// Generates a terminal-displayable QR code using Unicode block characters.
///
/// Two module rows are packed into each text line:
/// - Upper half block (U+2580): dark on top, light below
/// - Lower half block (U+2584): light on top, dark below
/// - Full block (U+2588): both dark
/// - Space: both light
///
/// # Errors
/// Returns an error if the URL does not fit in a QR code.
pub fn generate_terminal_qr(url: &str) -> anyhow::Result<String> {
    let code = QrCode::new(url.as_bytes())?;
    let modules = code.to_colors();
    let width = code.width();
    let height = modules.len() / width;

    let full_width = width + 2 * TERMINAL_QUIET_ZONE;
    let blank_line = " ".repeat(full_width);
    let margin = " ".repeat(TERMINAL_QUIET_ZONE);

    let mut output = String::new();

    for _ in 0..TERMINAL_QUIET_ZONE / 2 {
        output.push_str(&blank_line);
        output.push('\n');
    }

    for row in (0..height).step_by(2) {
        output.push_str(&margin);

        for col in 0..width {
            let top_dark = modules[row * width + col] == Color::Dark;
            let bottom_dark = row + 1 < height && modules[(row + 1) * width + col] == Color::Dark;

            let ch = match (top_dark, bottom_dark) {
                (true, true) => '\u{2588}',
                (true, false) => '\u{2580}',
                (false, true) => '\u{2584}',
                (false, false) => ' ',
            };
            output.push(ch);
        }

        output.push_str(&margin);
        output.push('\n');
    }

    for _ in 0..TERMINAL_QUIET_ZONE / 2 {
        output.push_str(&blank_line);
        output.push('\n');
    }

    Ok(output)
}

/// Draw the QR code of `url` as a grayscale image with a quiet zone.
fn render_image(url: &str) -> anyhow::Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
    let code = QrCode::new(url.as_bytes())?;
    let modules = code.to_colors();
    let qr_width = code.width();

    let quiet_zone_pixels = PNG_QUIET_ZONE * PNG_MODULE_SIZE;
    let image_size = qr_width as u32 * PNG_MODULE_SIZE + 2 * quiet_zone_pixels;

    // White background
    let mut img = ImageBuffer::from_pixel(image_size, image_size, Luma([255u8]));

    for (idx, color) in modules.iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }

        let row = (idx / qr_width) as u32;
        let col = (idx % qr_width) as u32;
        let x_start = quiet_zone_pixels + col * PNG_MODULE_SIZE;
        let y_start = quiet_zone_pixels + row * PNG_MODULE_SIZE;

        for dy in 0..PNG_MODULE_SIZE {
            for dx in 0..PNG_MODULE_SIZE {
                img.put_pixel(x_start + dx, y_start + dy, Luma([0u8]));
            }
        }
    }

    Ok(img)
}

/// Generates a PNG QR code and saves it to the specified path.
///
/// # Errors
/// Returns an error if the QR code cannot be generated or saved.
pub fn generate_png_qr(url: &str, path: &Path) -> anyhow::Result<()> {
    let img = render_image(url)?;
    img.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

/// Generates a PNG QR code and returns it as bytes.
///
/// # Errors
/// Returns an error if the QR code cannot be generated.
pub fn generate_png_qr_bytes(url: &str) -> anyhow::Result<Vec<u8>> {
    let img = render_image(url)?;

    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;

    Ok(bytes)
}

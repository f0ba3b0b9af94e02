pub mod compositor;
pub mod config;
pub mod logo;
pub mod pdf;
pub mod placement;
pub mod processor;
pub mod sampler;
pub mod session;
pub mod shading;

#[cfg(test)]
mod test_support;

use wasm_bindgen::prelude::*;

/// Places the logo on every page. `config_json` holds the logo configuration
/// (same fields as the TOML file); an empty string means defaults.
#[wasm_bindgen]
pub fn process_pdf(pdf_bytes: &[u8], logo_bytes: &[u8], config_json: &str) -> Result<Vec<u8>, JsValue> {
    if pdf_bytes.is_empty() || logo_bytes.is_empty() {
        return Err(JsValue::from_str(&session::SessionError::MissingUpload.to_string()));
    }
    let config: config::LogoConfig = if config_json.trim().is_empty() {
        config::LogoConfig::default()
    } else {
        serde_json::from_str(config_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid configuration: {}", e)))?
    };

    let (pdf_out, _) =
        processor::process_pdf_bytes(pdf_bytes, logo_bytes, &config::PageSelection::All, &config)
            .map_err(|e| JsValue::from_str(&session::SessionError::Processing(e).to_string()))?;

    Ok(pdf_out)
}

#[wasm_bindgen]
pub fn get_page_count(pdf_bytes: &[u8]) -> Result<usize, JsValue> {
    let doc = lopdf::Document::load_mem(pdf_bytes).map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(pdf::page_count(&doc))
}

#[wasm_bindgen]
pub fn output_file_name(original: &str) -> String {
    session::output_file_name(original)
}

/// The logo form of a browser front end, keeping width, height and panel
/// size linked to the uploaded logo until the user edits them.
/// `config_json` hands the result to [`process_pdf`].
#[wasm_bindgen]
pub struct LogoForm {
    defaults: session::FormDefaults,
}

#[wasm_bindgen]
impl LogoForm {
    #[wasm_bindgen(constructor)]
    pub fn new() -> LogoForm {
        LogoForm {
            defaults: session::FormDefaults::new(),
        }
    }

    /// A logo of `width x height` pixels was uploaded.
    pub fn logo_loaded(&mut self, width: u32, height: u32) {
        self.defaults.logo_loaded(width, height);
    }

    pub fn set_logo_width(&mut self, width: f64) {
        self.defaults.set_logo_width(width);
    }

    pub fn set_logo_height(&mut self, height: f64) {
        self.defaults.set_logo_height(height);
    }

    pub fn set_padding(&mut self, padding: f64) {
        self.defaults.set_padding(padding);
    }

    pub fn set_bg_width(&mut self, width: f64) {
        self.defaults.set_bg_width(width);
    }

    pub fn set_bg_height(&mut self, height: f64) {
        self.defaults.set_bg_height(height);
    }

    #[wasm_bindgen(getter)]
    pub fn logo_width(&self) -> f64 {
        self.defaults.logo_width.value
    }

    #[wasm_bindgen(getter)]
    pub fn logo_height(&self) -> f64 {
        self.defaults.logo_height.value
    }

    #[wasm_bindgen(getter)]
    pub fn bg_width(&self) -> f64 {
        self.defaults.bg_width.value
    }

    #[wasm_bindgen(getter)]
    pub fn bg_height(&self) -> f64 {
        self.defaults.bg_height.value
    }

    /// The configuration the form submits, as JSON for [`process_pdf`].
    pub fn config_json(
        &self,
        position: &str,
        x: Option<f64>,
        y: Option<f64>,
        opacity: f64,
        rotation: f64,
    ) -> Result<String, JsValue> {
        self.submission(position, x, y, opacity, rotation)
            .map_err(|e| JsValue::from_str(&session::SessionError::Processing(e).to_string()))
    }
}

impl Default for LogoForm {
    fn default() -> Self {
        Self::new()
    }
}

impl LogoForm {
    fn submission(
        &self,
        position: &str,
        x: Option<f64>,
        y: Option<f64>,
        opacity: f64,
        rotation: f64,
    ) -> anyhow::Result<String> {
        let position: config::Position = position.parse()?;
        let custom = x.zip(y);
        let config = self.defaults.to_config(position, custom, opacity, rotation);
        config.validate()?;
        Ok(serde_json::to_string(&config)?)
    }
}

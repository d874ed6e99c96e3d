use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use crate::{
    native::{self, Driver},
    Error,
};

bitflags::bitflags! {
    /// Flags for each of shader stages. Bits match native stage flags.
    pub struct ShaderStages: u32 {
        const VERTEX                    = 0b000001;
        const TESSELLATION_CONTROL      = 0b000010;
        const TESSELLATION_EVALUATION   = 0b000100;
        const GEOMETRY                  = 0b001000;
        const FRAGMENT                  = 0b010000;
        const COMPUTE                   = 0b100000;

        const ALL_GRAPHICS              = 0b011111;
    }
}

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader code and the stage it runs in.
#[derive(Clone, PartialEq, Eq)]
pub struct ShaderInfo {
    pub stage: ShaderStages,

    /// SPIR-V binary.
    pub code: Box<[u8]>,
    pub entry_point: String,
}

impl ShaderInfo {
    pub fn new(stage: ShaderStages, code: impl Into<Box<[u8]>>, entry_point: &str) -> Self {
        ShaderInfo {
            stage,
            code: code.into(),
            entry_point: entry_point.to_owned(),
        }
    }
}

impl Debug for ShaderInfo {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ShaderInfo")
            .field("stage", &self.stage)
            .field("code", &format_args!("<{} bytes>", self.code.len()))
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

fn spirv_words(code: &[u8]) -> Result<Vec<u32>, Error> {
    if code.is_empty() || code.len() % 4 != 0 {
        return Err(Error::invalid(format!(
            "SPIR-V code size must be a non-zero multiple of 4, got {}",
            code.len()
        )));
    }

    let words: Vec<u32> = match bytemuck::try_cast_slice::<u8, u32>(code) {
        Ok(words) => words.to_vec(),
        Err(_) => code
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    };

    if words[0] != SPIRV_MAGIC {
        return Err(Error::invalid("Shader code is not SPIR-V"));
    }

    Ok(words)
}

/// Compiled shader module.
pub struct Shader {
    driver: Arc<dyn Driver>,
    module: native::ShaderModule,
    stage: ShaderStages,
    entry_point: String,
}

impl Shader {
    pub(crate) fn new(driver: &Arc<dyn Driver>, info: &ShaderInfo) -> Result<Self, Error> {
        if info.stage.bits().count_ones() != 1 {
            return Err(Error::invalid(format!(
                "Shader must target exactly one stage, got {:?}",
                info.stage
            )));
        }

        let words = spirv_words(&info.code)?;
        let module = driver.create_shader_module(&words)?;
        tracing::debug!("Shader {:?} created for {:?}", module, info.stage);

        Ok(Shader {
            driver: driver.clone(),
            module,
            stage: info.stage,
            entry_point: info.entry_point.clone(),
        })
    }

    #[inline]
    pub fn module(&self) -> native::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStages {
        self.stage
    }

    #[inline]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.driver.destroy_shader_module(self.module);
    }
}

impl Debug for Shader {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "Shader({:#x}, {:?}, {})",
            self.module.0, self.stage, self.entry_point
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_truncated_code() {
        assert!(matches!(
            spirv_words(&[0x03, 0x02, 0x23]),
            Err(Error::InvalidOperation { .. })
        ));
    }

    #[test]
    fn accepts_magic() {
        let code: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000]
            .iter()
            .flat_map(|w| w.to_ne_bytes())
            .collect();
        assert_eq!(spirv_words(&code).unwrap(), vec![SPIRV_MAGIC, 0x0001_0000]);
    }
}

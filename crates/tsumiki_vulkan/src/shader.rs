use std::{ffi::CString, io::Cursor, rc::Rc};

use ash::{util::read_spv, vk};

use crate::{Device, TsError, TsResult};

/// A vertex + fragment shader module pair with their entry points.
pub struct ShaderProgram {
    device: Rc<dyn Device>,
    vertex_shader: vk::ShaderModule,
    vertex_entry_point: CString,
    fragment_shader: vk::ShaderModule,
    fragment_entry_point: CString,
}

impl ShaderProgram {
    /// Creates both modules from precompiled SPIR-V. Entry point names are
    /// taken from the modules' reflection data.
    pub fn from_spirv(
        device: &Rc<dyn Device>,
        vertex_shader_code: &[u8],
        fragment_shader_code: &[u8],
    ) -> TsResult<Self> {
        let vertex_shader_code = read_spv(&mut Cursor::new(vertex_shader_code))?;
        let fragment_shader_code = read_spv(&mut Cursor::new(fragment_shader_code))?;

        let vertex_entry_point = reflect_entry_point(&vertex_shader_code)?;
        let fragment_entry_point = reflect_entry_point(&fragment_shader_code)?;

        let vertex_shader = device.create_shader_module(&vertex_shader_code)?;
        let fragment_shader = match device.create_shader_module(&fragment_shader_code) {
            Ok(module) => module,
            Err(err) => {
                device.destroy_shader_module(vertex_shader);
                return Err(err);
            }
        };

        Ok(Self {
            device: device.clone(),
            vertex_shader,
            vertex_entry_point,
            fragment_shader,
            fragment_entry_point,
        })
    }

    /// Takes ownership of modules that were already created on `device`.
    pub fn from_modules(
        device: &Rc<dyn Device>,
        vertex_shader: vk::ShaderModule,
        fragment_shader: vk::ShaderModule,
        entry_point: &str,
    ) -> TsResult<Self> {
        Ok(Self {
            device: device.clone(),
            vertex_shader,
            vertex_entry_point: CString::new(entry_point)?,
            fragment_shader,
            fragment_entry_point: CString::new(entry_point)?,
        })
    }

    /// Stage descriptions for a graphics pipeline. Borrow `self` for as long
    /// as the returned structs are used.
    pub fn stages(&self) -> [vk::PipelineShaderStageCreateInfo; 2] {
        [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.vertex_shader)
                .name(self.vertex_entry_point.as_c_str())
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.fragment_shader)
                .name(self.fragment_entry_point.as_c_str())
                .build(),
        ]
    }

    pub fn vertex_shader(&self) -> vk::ShaderModule {
        self.vertex_shader
    }

    pub fn fragment_shader(&self) -> vk::ShaderModule {
        self.fragment_shader
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        self.device.destroy_shader_module(self.vertex_shader);
        self.device.destroy_shader_module(self.fragment_shader);
    }
}

fn reflect_entry_point(code: &[u32]) -> TsResult<CString> {
    let module = spirv_reflect::ShaderModule::load_u32_data(code)
        .map_err(|err| TsError::InvalidShader(err.to_string()))?;
    Ok(CString::new(module.get_entry_point_name())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockDevice, MockObject};

    #[test]
    fn test_shader_program_destroys_modules() {
        let mock = Rc::new(MockDevice::new());
        let device: Rc<dyn Device> = mock.clone();
        let vertex = device.create_shader_module(&[0x0723_0203]).unwrap();
        let fragment = device.create_shader_module(&[0x0723_0203]).unwrap();

        let program = ShaderProgram::from_modules(&device, vertex, fragment, "main").unwrap();
        assert_eq!(program.stages()[0].module, vertex);
        assert_eq!(program.stages()[1].stage, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(mock.live_count(MockObject::ShaderModule), 2);

        drop(program);
        assert_eq!(mock.live_count(MockObject::ShaderModule), 0);
    }

    #[test]
    fn test_from_spirv_rejects_truncated_code() {
        let device: Rc<dyn Device> = Rc::new(MockDevice::new());
        let result = ShaderProgram::from_spirv(&device, &[0x03, 0x02, 0x23], &[]);
        assert!(result.is_err());
    }
}

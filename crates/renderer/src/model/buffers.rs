//! GPU buffers backing a loaded model.

use crate::error::ModelError;
use crate::gpu::{
    AttributeFormat, BufferHandle, BufferUsage, GraphicsDevice, TextureUnit, VertexArrayHandle, VertexAttribute,
};

use super::aggregate::VertexStreams;

/// Attribute locations and texture unit the model's shaders expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLayout {
    pub position_location: u32,
    pub tex_coord_location: u32,
    pub normal_location: u32,
    /// First of four locations holding the per-instance WVP matrix.
    pub wvp_location: u32,
    /// First of four locations holding the per-instance world matrix.
    pub world_location: u32,
    pub color_unit: TextureUnit,
}

impl Default for BufferLayout {
    fn default() -> Self {
        Self {
            position_location: 0,
            tex_coord_location: 1,
            normal_location: 2,
            wvp_location: 3,
            world_location: 7,
            color_unit: TextureUnit(0),
        }
    }
}

impl BufferLayout {
    pub fn position(&self) -> VertexAttribute {
        VertexAttribute::per_vertex(self.position_location, AttributeFormat::Float32x3)
    }

    pub fn tex_coord(&self) -> VertexAttribute {
        VertexAttribute::per_vertex(self.tex_coord_location, AttributeFormat::Float32x2)
    }

    pub fn normal(&self) -> VertexAttribute {
        VertexAttribute::per_vertex(self.normal_location, AttributeFormat::Float32x3)
    }

    pub fn wvp(&self) -> VertexAttribute {
        VertexAttribute::per_instance(self.wvp_location, AttributeFormat::Mat4)
    }

    pub fn world(&self) -> VertexAttribute {
        VertexAttribute::per_instance(self.world_location, AttributeFormat::Mat4)
    }
}

/// One buffer per stream, plus the instance matrix buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelBuffers {
    pub index: BufferHandle,
    pub position: BufferHandle,
    pub tex_coord: BufferHandle,
    pub normal: BufferHandle,
    pub wvp: BufferHandle,
    pub world: BufferHandle,
}

impl ModelBuffers {
    pub(crate) fn allocate(device: &dyn GraphicsDevice) -> Self {
        Self {
            index: device.create_buffer(),
            position: device.create_buffer(),
            tex_coord: device.create_buffer(),
            normal: device.create_buffer(),
            wvp: device.create_buffer(),
            world: device.create_buffer(),
        }
    }

    pub fn all(&self) -> [BufferHandle; 6] {
        [self.index, self.position, self.tex_coord, self.normal, self.wvp, self.world]
    }

    pub(crate) fn release(self, device: &dyn GraphicsDevice) {
        for buffer in self.all() {
            device.delete_buffer(buffer);
        }
    }

    /// Upload the flattened geometry once, with static usage.
    pub(crate) fn populate(
        &self,
        device: &dyn GraphicsDevice,
        vao: VertexArrayHandle,
        layout: &BufferLayout,
        streams: &VertexStreams,
        indices: &[u32],
    ) -> Result<(), ModelError> {
        if streams.is_empty() || indices.is_empty() {
            return Err(ModelError::EmptyGeometry);
        }

        device.upload_vertex_attribute(
            vao,
            self.position,
            layout.position(),
            bytemuck::cast_slice(streams.positions()),
            BufferUsage::Static,
        );
        device.upload_vertex_attribute(
            vao,
            self.tex_coord,
            layout.tex_coord(),
            bytemuck::cast_slice(streams.tex_coords()),
            BufferUsage::Static,
        );
        device.upload_vertex_attribute(
            vao,
            self.normal,
            layout.normal(),
            bytemuck::cast_slice(streams.normals()),
            BufferUsage::Static,
        );
        device.upload_index_buffer(vao, self.index, indices);
        Ok(())
    }
}

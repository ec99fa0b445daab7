use crate::model::TextureData;
use crate::renderer::webgpu::mipmap::{mip_level_count, MipKind, MipmapGenerator};

/// A texture together with the view the material bind groups use.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// Uploads one mip level, padding rows out to the 256-byte alignment
/// `write_texture` requires.
pub fn upload_level(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    mip_level: u32,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    data: &[u8],
) {
    let bytes_per_row = width * bytes_per_pixel;
    let aligned_bytes_per_row = (bytes_per_row + 255) & !255;
    let data_size = aligned_bytes_per_row as usize * height as usize;
    let mut aligned_data = vec![0u8; data_size];

    for y in 0..height {
        let src_start = (y * bytes_per_row) as usize;
        let src_end = src_start + bytes_per_row as usize;
        let dst_start = (y * aligned_bytes_per_row) as usize;
        let dst_end = dst_start + bytes_per_row as usize;

        if src_end <= data.len() && dst_end <= aligned_data.len() {
            aligned_data[dst_start..dst_end].copy_from_slice(&data[src_start..src_end]);
        }
    }

    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &aligned_data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(aligned_bytes_per_row),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

/// Uploads RGBA8 material pixels and fills the whole mip chain.
///
/// The sRGB kind renders its mips directly into the final texture.
/// The linear kinds go through an RGBA8 UNORM storage intermediate
/// (storage writes are not available for every final format) and the
/// finished chain is copied over level by level.
pub fn create_material_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    mipmaps: &MipmapGenerator,
    data: &TextureData,
    format: wgpu::TextureFormat,
    kind: MipKind,
) -> GpuTexture {
    let mip_count = mip_level_count(data.width, data.height);
    let size = wgpu::Extent3d {
        width: data.width,
        height: data.height,
        depth_or_array_layers: 1,
    };

    let texture = if kind == MipKind::Srgb2D {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&data.name),
            size,
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        upload_level(queue, &texture, 0, data.width, data.height, 4, &data.pixels);
        mipmaps.generate(&texture, data.width, data.height, kind);
        texture
    } else {
        let intermediate = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Mipmap Intermediate"),
            size,
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        upload_level(
            queue,
            &intermediate,
            0,
            data.width,
            data.height,
            4,
            &data.pixels,
        );
        mipmaps.generate(&intermediate, data.width, data.height, kind);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&data.name),
            size,
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Mipmap Copy Encoder"),
        });
        for level in 0..mip_count {
            encoder.copy_texture_to_texture(
                wgpu::ImageCopyTexture {
                    texture: &intermediate,
                    mip_level: level,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: level,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: (data.width >> level).max(1),
                    height: (data.height >> level).max(1),
                    depth_or_array_layers: 1,
                },
            );
        }
        queue.submit(Some(encoder.finish()));
        texture
    };

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}

/// RGBA16F cubemap target for the environment and IBL passes.
pub fn create_cube_texture(
    device: &wgpu::Device,
    label: &str,
    edge: u32,
    mip_count: u32,
) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: edge,
            height: edge,
            depth_or_array_layers: 6,
        },
        mip_level_count: mip_count,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba16Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        dimension: Some(wgpu::TextureViewDimension::Cube),
        ..Default::default()
    });
    GpuTexture { texture, view }
}

/// One-texel stand-ins bound wherever a material leaves a slot empty.
pub struct DefaultTextures {
    pub srgb_white: GpuTexture,
    pub unorm_white: GpuTexture,
    pub flat_normal: GpuTexture,
}

impl DefaultTextures {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self {
            srgb_white: single_texel(
                device,
                queue,
                "Default White (sRGB)",
                wgpu::TextureFormat::Rgba8UnormSrgb,
                [255, 255, 255, 255],
            ),
            unorm_white: single_texel(
                device,
                queue,
                "Default White (Linear)",
                wgpu::TextureFormat::Rgba8Unorm,
                [255, 255, 255, 255],
            ),
            flat_normal: single_texel(
                device,
                queue,
                "Default Normal",
                wgpu::TextureFormat::Rgba8Unorm,
                [128, 128, 255, 255],
            ),
        }
    }
}

fn single_texel(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    format: wgpu::TextureFormat,
    texel: [u8; 4],
) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    upload_level(queue, &texture, 0, 1, 1, 4, &texel);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}

use std::sync::Arc;

use raw_window_handle::{RawDisplayHandle, RawWindowHandle, XlibDisplayHandle, XlibWindowHandle};
use rstest::{fixture, rstest};
use strata::{
    backend::headless::{Command, HeadlessConfig, HeadlessDriver, HeadlessObject},
    native::{
        AcquireResult, ClearValue, DescriptorResource, Driver as _, ImageLayout, PresentMode,
        PresentResult, ResultCode, SurfaceCapabilities, SurfaceSource,
    },
    BindableResource, BlendStateInfo, BufferInfo, BufferUsage, DepthStencilStateInfo, Device,
    Error, Extent2, Filter, Framebuffer, FramebufferInfo, GraphicsDeviceOptions,
    GraphicsPipelineInfo, OutputInfo, Pipeline, PixelFormat, PrimitiveTopology,
    RasterizerStateInfo, ResourceKind, ResourceLayout, ResourceLayoutElementInfo,
    ResourceLayoutInfo, ResourceSetInfo, RgbaFloat, Shader, ShaderInfo, ShaderStages,
    SwapchainInfo, Texture, TextureInfo, TextureSampleCount, TextureUsage, TextureViewInfo,
    POOL_MAX_SETS,
};

#[fixture]
fn logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn headless(config: HeadlessConfig) -> (Arc<HeadlessDriver>, Device) {
    let driver = Arc::new(HeadlessDriver::new(config));
    let device = Device::new(driver.clone(), GraphicsDeviceOptions::default(), None).unwrap();
    (driver, device)
}

fn deferred() -> HeadlessConfig {
    HeadlessConfig {
        signal_fences_on_submit: false,
        ..HeadlessConfig::default()
    }
}

fn window() -> SurfaceSource {
    SurfaceSource {
        window: RawWindowHandle::Xlib(XlibWindowHandle::empty()),
        display: RawDisplayHandle::Xlib(XlibDisplayHandle::empty()),
    }
}

fn with_window(vsync: bool) -> (Arc<HeadlessDriver>, Device) {
    let driver = Arc::new(HeadlessDriver::new(HeadlessConfig::default()));
    let options = GraphicsDeviceOptions {
        sync_to_vertical_blank: vsync,
        has_main_swapchain: true,
        ..GraphicsDeviceOptions::default()
    };
    let device = Device::new(
        driver.clone(),
        options,
        Some(SwapchainInfo::new(window(), 800, 600)),
    )
    .unwrap();
    (driver, device)
}

fn render_target(device: &Device) -> (Texture, Framebuffer) {
    let color = device
        .create_texture(TextureInfo::texture_2d(
            64,
            64,
            1,
            1,
            PixelFormat::RGBA8Unorm,
            TextureUsage::RENDER_TARGET,
        ))
        .unwrap();
    let framebuffer = device
        .create_framebuffer(&FramebufferInfo::new(None, &[&color]))
        .unwrap();
    (color, framebuffer)
}

fn shader(device: &Device, stage: ShaderStages) -> Shader {
    let code: Vec<u8> = [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|word| word.to_ne_bytes())
        .collect();
    device
        .create_shader(&ShaderInfo::new(stage, code, "main"))
        .unwrap()
}

fn pipeline(device: &Device, layouts: Vec<&ResourceLayout>) -> Pipeline {
    let vertex = shader(device, ShaderStages::VERTEX);
    let fragment = shader(device, ShaderStages::FRAGMENT);
    device
        .create_graphics_pipeline(&GraphicsPipelineInfo {
            blend_state: BlendStateInfo::single_override(),
            depth_stencil_state: DepthStencilStateInfo::DISABLED,
            rasterizer_state: RasterizerStateInfo::default(),
            primitive_topology: PrimitiveTopology::TriangleList,
            vertex_layouts: Vec::new(),
            shaders: vec![&vertex, &fragment],
            specializations: Vec::new(),
            resource_layouts: layouts,
            outputs: OutputInfo::new(&[PixelFormat::RGBA8Unorm], None),
        })
        .unwrap()
}

fn uniform_layout(device: &Device) -> ResourceLayout {
    device
        .create_resource_layout(&ResourceLayoutInfo::new(vec![ResourceLayoutElementInfo::new(
            "Globals",
            ResourceKind::UniformBuffer,
            ShaderStages::VERTEX,
        )]))
        .unwrap()
}

fn descriptor_binds(commands: &[Command]) -> Vec<(u32, usize)> {
    commands
        .iter()
        .filter_map(|command| match command {
            Command::BindDescriptorSets {
                first_set, sets, ..
            } => Some((*first_set, sets.len())),
            _ => None,
        })
        .collect()
}

fn position(commands: &[Command], predicate: impl Fn(&Command) -> bool) -> Option<usize> {
    commands.iter().position(predicate)
}

#[rstest]
fn buffer_outlives_pending_submission(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(deferred());

    let buffer = device
        .create_buffer(BufferInfo::new(64, BufferUsage::UNIFORM))
        .unwrap();
    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.update_buffer(&buffer, 0, &[7; 16]).unwrap();
    list.end().unwrap();
    device.submit_commands(&mut list, None).unwrap();

    let live = driver.live_objects(HeadlessObject::Buffer);
    drop(buffer);
    assert_eq!(driver.live_objects(HeadlessObject::Buffer), live);

    driver.finish_all();
    device.check_submitted_fences().unwrap();
    assert_eq!(driver.live_objects(HeadlessObject::Buffer), live - 1);
    assert_eq!(driver.take_validation_error(), None);
}

#[rstest]
fn submissions_complete_in_order(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(deferred());

    let mut lists: Vec<_> = (0..3)
        .map(|_| device.create_command_list().unwrap())
        .collect();
    for list in &mut lists {
        list.begin().unwrap();
        list.end().unwrap();
        device.submit_commands(list, None).unwrap();
    }
    assert_eq!(device.pending_submissions(), 3);

    let fences: Vec<_> = driver
        .submissions()
        .iter()
        .rev()
        .take(3)
        .rev()
        .map(|record| record.fence)
        .collect();

    // The second finishing first does not complete anything.
    driver.signal_fence(fences[1]);
    device.check_submitted_fences().unwrap();
    assert_eq!(device.pending_submissions(), 3);

    driver.signal_fence(fences[0]);
    device.check_submitted_fences().unwrap();
    assert_eq!(device.pending_submissions(), 1);

    driver.signal_fence(fences[2]);
    device.check_submitted_fences().unwrap();
    assert_eq!(device.pending_submissions(), 0);
}

#[rstest]
fn completed_command_buffer_is_reused(
    #[from(logging)] _logging: (),
    #[values(1, 4, 16)] cycles: usize,
) {
    let (driver, device) = headless(HeadlessConfig::default());
    let mut list = device.create_command_list().unwrap();
    let first = list.command_buffer();
    let allocated = driver.allocated_command_buffers();

    for _ in 0..cycles {
        list.begin().unwrap();
        assert_eq!(list.command_buffer(), first);
        list.end().unwrap();
        device.submit_commands(&mut list, None).unwrap();
        device.check_submitted_fences().unwrap();
    }

    assert_eq!(driver.allocated_command_buffers(), allocated);
}

#[rstest]
fn resubmitting_without_begin_fails(#[from(logging)] _logging: ()) {
    let (_, device) = headless(HeadlessConfig::default());
    let mut list = device.create_command_list().unwrap();

    assert!(matches!(
        device.submit_commands(&mut list, None),
        Err(Error::InvalidOperation { .. })
    ));

    list.begin().unwrap();
    assert!(list.begin().is_err());
    list.end().unwrap();
    device.submit_commands(&mut list, None).unwrap();
    assert!(matches!(
        device.submit_commands(&mut list, None),
        Err(Error::InvalidOperation { .. })
    ));
}

#[rstest]
#[case(false, vec![ClearValue::Color([1.0; 4])])]
#[case(true, vec![ClearValue::Color([1.0; 4]), ClearValue::DepthStencil { depth: 1.0, stencil: 3 }])]
fn queued_clears_flush_on_end(
    #[from(logging)] _logging: (),
    #[case] with_depth: bool,
    #[case] expected: Vec<ClearValue>,
) {
    let (driver, device) = headless(HeadlessConfig::default());

    let color = device
        .create_texture(TextureInfo::texture_2d(
            64,
            64,
            1,
            1,
            PixelFormat::RGBA8Unorm,
            TextureUsage::RENDER_TARGET,
        ))
        .unwrap();
    let depth = device
        .create_texture(TextureInfo::texture_2d(
            64,
            64,
            1,
            1,
            PixelFormat::D24UnormS8Uint,
            TextureUsage::DEPTH_STENCIL,
        ))
        .unwrap();

    let framebuffer = device
        .create_framebuffer(&FramebufferInfo::new(
            if with_depth { Some(&depth) } else { None },
            &[&color],
        ))
        .unwrap();

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.set_framebuffer(&framebuffer).unwrap();
    list.clear_color_target(0, RgbaFloat::WHITE).unwrap();
    if with_depth {
        list.clear_depth_stencil(1.0, 3).unwrap();
    } else {
        assert!(list.clear_depth_stencil(1.0, 3).is_err());
    }
    list.end().unwrap();

    let commands = driver.commands(list.command_buffer());
    let begins: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            Command::BeginRenderPass { clear_values, .. } => Some(clear_values.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(begins, vec![expected]);

    let ends = commands
        .iter()
        .filter(|command| **command == Command::EndRenderPass)
        .count();
    assert_eq!(ends, 1);
}

#[rstest]
fn resource_sets_return_descriptors(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(HeadlessConfig::default());

    let layout = device
        .create_resource_layout(&ResourceLayoutInfo::new(vec![ResourceLayoutElementInfo::new(
            "Globals",
            ResourceKind::UniformBuffer,
            ShaderStages::VERTEX,
        )]))
        .unwrap();
    let buffer = device
        .create_buffer(BufferInfo::new(256, BufferUsage::UNIFORM))
        .unwrap();

    let initial = device.descriptor_pool_manager().remaining();
    let sets: Vec<_> = (0..3)
        .map(|_| {
            device
                .create_resource_set(&ResourceSetInfo::new(
                    &layout,
                    vec![BindableResource::from(&buffer)],
                ))
                .unwrap()
        })
        .collect();

    let (remaining_sets, _) = device.descriptor_pool_manager().remaining()[0];
    assert_eq!(remaining_sets, POOL_MAX_SETS - 3);
    assert_eq!(driver.live_objects(HeadlessObject::DescriptorSet), 3);

    drop(sets);
    assert_eq!(device.descriptor_pool_manager().remaining(), initial);
    assert_eq!(driver.live_objects(HeadlessObject::DescriptorSet), 0);
}

#[rstest]
fn layouts_are_tracked_per_subresource(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(HeadlessConfig::default());
    let texture = device
        .create_texture(TextureInfo::texture_2d(
            32,
            32,
            2,
            1,
            PixelFormat::RGBA8Unorm,
            TextureUsage::SAMPLED,
        ))
        .unwrap();
    assert_eq!(texture.layout(0, 0), ImageLayout::ShaderReadOnlyOptimal);
    assert_eq!(texture.layout(1, 0), ImageLayout::ShaderReadOnlyOptimal);

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    let cb = list.command_buffer();
    texture.transition_image_layout(cb, 0, 1, 0, 1, ImageLayout::TransferDstOptimal);

    assert_eq!(texture.layout(0, 0), ImageLayout::TransferDstOptimal);
    assert_eq!(texture.layout(1, 0), ImageLayout::ShaderReadOnlyOptimal);

    // Same layout again records nothing.
    let before = driver.commands(cb).len();
    texture.transition_image_layout(cb, 0, 1, 0, 1, ImageLayout::TransferDstOptimal);
    assert_eq!(driver.commands(cb).len(), before);
}

#[cfg(debug_assertions)]
#[rstest]
#[should_panic(expected = "Unexpected image layout")]
fn mismatched_range_transition_panics(#[from(logging)] _logging: ()) {
    let (_, device) = headless(HeadlessConfig::default());
    let texture = device
        .create_texture(TextureInfo::texture_2d(
            32,
            32,
            2,
            1,
            PixelFormat::RGBA8Unorm,
            TextureUsage::SAMPLED,
        ))
        .unwrap();

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    let cb = list.command_buffer();
    texture.transition_image_layout(cb, 0, 1, 0, 1, ImageLayout::TransferDstOptimal);
    texture.transition_image_layout(cb, 0, 2, 0, 1, ImageLayout::TransferSrcOptimal);
}

#[rstest]
fn validation_errors_fail_the_next_call(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(HeadlessConfig::default());

    driver.report_validation_error("vkCreateFence: bad things");
    assert!(matches!(device.create_fence(false), Err(Error::Validation { .. })));
    assert!(device.create_fence(false).is_ok());
}

#[rstest]
fn main_swapchain_requires_description(#[from(logging)] _logging: ()) {
    let driver = Arc::new(HeadlessDriver::new(HeadlessConfig::default()));
    let options = GraphicsDeviceOptions {
        has_main_swapchain: true,
        ..GraphicsDeviceOptions::default()
    };
    assert!(matches!(
        Device::new(driver, options, None),
        Err(Error::InvalidOperation { .. })
    ));
}

#[rstest]
fn resize_recreates_with_clamped_extent(#[from(logging)] _logging: ()) {
    let (driver, device) = with_window(true);
    let swapchain = device.main_swapchain().unwrap();
    let created = driver.created_swapchains().len();

    device.resize_main_window(1024, 768).unwrap();
    device.resize_main_window(1024, 768).unwrap();

    assert_eq!(driver.created_swapchains().len(), created + 2);
    assert_eq!(driver.live_objects(HeadlessObject::Swapchain), 1);
    assert_eq!(swapchain.framebuffer().width(), 1024);
    assert_eq!(swapchain.framebuffer().height(), 768);
    assert_eq!(
        driver.live_swapchain_images(swapchain.native()).len(),
        swapchain.framebuffer().image_count()
    );

    device.resize_main_window(10_000, 100).unwrap();
    assert_eq!(swapchain.framebuffer().width(), 4096);
}

#[rstest]
fn vsync_change_applies_on_next_acquire(#[from(logging)] _logging: ()) {
    let (driver, device) = with_window(true);
    let swapchain = device.main_swapchain().unwrap();
    assert_eq!(swapchain.present_mode(), PresentMode::FifoRelaxed);
    let created = driver.created_swapchains().len();

    // Toggling back and forth before an acquire changes nothing.
    swapchain.set_sync_to_vertical_blank(false);
    swapchain.set_sync_to_vertical_blank(true);
    assert!(swapchain.acquire_next_image().unwrap());
    assert_eq!(driver.created_swapchains().len(), created);

    swapchain.set_sync_to_vertical_blank(false);
    assert!(!swapchain.sync_to_vertical_blank());
    assert_eq!(swapchain.present_mode(), PresentMode::FifoRelaxed);

    assert!(!swapchain.acquire_next_image().unwrap());
    assert_eq!(swapchain.present_mode(), PresentMode::Mailbox);
    assert_eq!(driver.created_swapchains().len(), created + 1);

    // The change is applied once.
    assert!(swapchain.acquire_next_image().unwrap());
    assert_eq!(driver.created_swapchains().len(), created + 1);
}

#[rstest]
#[case(PresentResult::OutOfDate)]
#[case(PresentResult::Suboptimal)]
fn stale_present_recreates_swapchain(#[from(logging)] _logging: (), #[case] result: PresentResult) {
    let (driver, device) = with_window(false);
    let created = driver.created_swapchains().len();

    driver.inject_present_result(result);
    device.swap_main_buffers().unwrap();

    assert_eq!(driver.created_swapchains().len(), created + 1);
    assert_eq!(driver.presents().len(), 1);
}

#[rstest]
fn out_of_date_acquire_recreates_swapchain(#[from(logging)] _logging: ()) {
    let (driver, device) = with_window(false);
    let swapchain = device.main_swapchain().unwrap();
    let created = driver.created_swapchains().len();

    driver.inject_acquire_result(AcquireResult::OutOfDate);
    assert!(!swapchain.acquire_next_image().unwrap());
    assert_eq!(driver.created_swapchains().len(), created + 1);
}

#[rstest]
fn clear_before_draw_folds_into_render_pass_begin(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(HeadlessConfig::default());
    let (_color, framebuffer) = render_target(&device);
    let pipeline = pipeline(&device, Vec::new());

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.set_framebuffer(&framebuffer).unwrap();
    list.clear_color_target(0, RgbaFloat::WHITE).unwrap();
    list.set_pipeline(&pipeline).unwrap();
    list.draw(3, 1, 0, 0).unwrap();
    list.clear_color_target(0, RgbaFloat::BLACK).unwrap();
    list.end().unwrap();

    let commands = driver.commands(list.command_buffer());
    let begin = position(&commands, |command| {
        matches!(command, Command::BeginRenderPass { clear_values, .. }
            if *clear_values == vec![ClearValue::Color([1.0; 4])])
    })
    .expect("render pass begins with the queued clear");
    let draw = position(&commands, |command| matches!(command, Command::Draw { .. })).unwrap();
    let clear = position(&commands, |command| {
        matches!(command, Command::ClearAttachments { .. })
    })
    .expect("clear inside the render pass is recorded as an attachment clear");

    assert!(begin < draw);
    assert!(draw < clear);
    assert_eq!(
        commands
            .iter()
            .filter(|command| matches!(command, Command::ClearAttachments { .. }))
            .count(),
        1
    );
    assert_eq!(driver.take_validation_error(), None);
}

#[rstest]
fn changed_sets_bind_in_contiguous_runs(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(HeadlessConfig::default());
    let (_color, framebuffer) = render_target(&device);
    let layout = uniform_layout(&device);
    let pipeline = pipeline(&device, vec![&layout; 3]);
    let buffer = device
        .create_buffer(BufferInfo::new(256, BufferUsage::UNIFORM))
        .unwrap();

    let sets: Vec<_> = (0..4)
        .map(|_| {
            device
                .create_resource_set(&ResourceSetInfo::new(
                    &layout,
                    vec![BindableResource::from(&buffer)],
                ))
                .unwrap()
        })
        .collect();

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    let cb = list.command_buffer();
    list.set_framebuffer(&framebuffer).unwrap();
    list.set_pipeline(&pipeline).unwrap();
    for slot in 0..3 {
        list.set_graphics_resource_set(slot, &sets[slot as usize], &[]).unwrap();
    }
    list.draw(3, 1, 0, 0).unwrap();
    assert_eq!(descriptor_binds(&driver.commands(cb)), vec![(0, 3)]);

    // Rebinding the set already in slot 0 changes nothing.
    list.set_graphics_resource_set(0, &sets[0], &[]).unwrap();
    list.set_graphics_resource_set(1, &sets[3], &[]).unwrap();
    list.draw(3, 1, 0, 0).unwrap();

    let commands = driver.commands(cb);
    assert_eq!(descriptor_binds(&commands), vec![(0, 3), (1, 1)]);
    let last = commands
        .iter()
        .rev()
        .find_map(|command| match command {
            Command::BindDescriptorSets { sets, .. } => Some(sets.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(last, vec![sets[3].descriptor_set()]);

    list.draw(3, 1, 0, 0).unwrap();
    assert_eq!(descriptor_binds(&driver.commands(cb)).len(), 2);
    list.end().unwrap();
}

#[rstest]
fn resource_set_keeps_buffer_alive_across_submissions(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(deferred());
    let (_color, framebuffer) = render_target(&device);
    let layout = uniform_layout(&device);
    let pipeline = pipeline(&device, vec![&layout]);
    let buffer = device
        .create_buffer(BufferInfo::new(256, BufferUsage::UNIFORM))
        .unwrap();
    let set = device
        .create_resource_set(&ResourceSetInfo::new(
            &layout,
            vec![BindableResource::from(&buffer)],
        ))
        .unwrap();

    driver.finish_all();
    device.check_submitted_fences().unwrap();
    let submitted = driver.submissions().len();

    let mut lists: Vec<_> = (0..2)
        .map(|_| device.create_command_list().unwrap())
        .collect();
    for list in &mut lists {
        list.begin().unwrap();
        list.set_framebuffer(&framebuffer).unwrap();
        list.set_pipeline(&pipeline).unwrap();
        list.set_graphics_resource_set(0, &set, &[]).unwrap();
        list.draw(3, 1, 0, 0).unwrap();
        list.end().unwrap();
        device.submit_commands(list, None).unwrap();
    }

    let fences: Vec<_> = driver.submissions()[submitted..]
        .iter()
        .map(|record| record.fence)
        .collect();
    assert_eq!(fences.len(), 2);

    let live = driver.live_objects(HeadlessObject::Buffer);
    drop(set);
    drop(buffer);
    assert_eq!(driver.live_objects(HeadlessObject::Buffer), live);

    driver.signal_fence(fences[0]);
    device.check_submitted_fences().unwrap();
    assert_eq!(driver.live_objects(HeadlessObject::Buffer), live);
    assert_eq!(driver.live_objects(HeadlessObject::DescriptorSet), 1);

    driver.signal_fence(fences[1]);
    device.check_submitted_fences().unwrap();
    assert_eq!(driver.live_objects(HeadlessObject::Buffer), live - 1);
    assert_eq!(driver.live_objects(HeadlessObject::DescriptorSet), 0);
    assert_eq!(driver.take_validation_error(), None);
}

#[rstest]
fn texture_view_set_writes_view_and_keeps_it_alive(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(HeadlessConfig::default());
    let texture = device
        .create_texture(TextureInfo::texture_2d(
            16,
            16,
            1,
            1,
            PixelFormat::RGBA8Unorm,
            TextureUsage::SAMPLED,
        ))
        .unwrap();
    let view = device
        .create_texture_view(TextureViewInfo::new(&texture))
        .unwrap();
    let layout = device
        .create_resource_layout(&ResourceLayoutInfo::new(vec![ResourceLayoutElementInfo::new(
            "Albedo",
            ResourceKind::TextureReadOnly,
            ShaderStages::FRAGMENT,
        )]))
        .unwrap();
    let set = device
        .create_resource_set(&ResourceSetInfo::new(
            &layout,
            vec![BindableResource::from(&view)],
        ))
        .unwrap();

    let writes = driver.descriptor_writes(set.descriptor_set());
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0].resource,
        DescriptorResource::Image {
            view: view.handle(),
            layout: ImageLayout::ShaderReadOnlyOptimal,
        }
    );

    let views = driver.live_objects(HeadlessObject::ImageView);
    drop(view);
    assert_eq!(driver.live_objects(HeadlessObject::ImageView), views);
    drop(set);
    assert_eq!(driver.live_objects(HeadlessObject::ImageView), views - 1);
}

#[rstest]
fn sampled_texture_is_readable_before_draw(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(HeadlessConfig::default());
    let (_color, framebuffer) = render_target(&device);
    let texture = device
        .create_texture(TextureInfo::texture_2d(
            16,
            16,
            1,
            1,
            PixelFormat::RGBA8Unorm,
            TextureUsage::SAMPLED,
        ))
        .unwrap();
    let view = device
        .create_texture_view(TextureViewInfo::new(&texture))
        .unwrap();
    let layout = device
        .create_resource_layout(&ResourceLayoutInfo::new(vec![ResourceLayoutElementInfo::new(
            "Albedo",
            ResourceKind::TextureReadOnly,
            ShaderStages::FRAGMENT,
        )]))
        .unwrap();
    let set = device
        .create_resource_set(&ResourceSetInfo::new(
            &layout,
            vec![BindableResource::from(&view)],
        ))
        .unwrap();
    let pipeline = pipeline(&device, vec![&layout]);

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    let cb = list.command_buffer();
    texture.transition_image_layout(cb, 0, 1, 0, 1, ImageLayout::TransferDstOptimal);

    list.set_framebuffer(&framebuffer).unwrap();
    list.set_pipeline(&pipeline).unwrap();
    list.set_graphics_resource_set(0, &set, &[]).unwrap();
    assert_eq!(texture.layout(0, 0), ImageLayout::TransferDstOptimal);
    list.draw(3, 1, 0, 0).unwrap();
    assert_eq!(texture.layout(0, 0), ImageLayout::ShaderReadOnlyOptimal);

    let commands = driver.commands(cb);
    let barrier = position(&commands, |command| match command {
        Command::PipelineBarrier { image_barriers, .. } => image_barriers.iter().any(|barrier| {
            barrier.image == texture.image()
                && barrier.old_layout == ImageLayout::TransferDstOptimal
                && barrier.new_layout == ImageLayout::ShaderReadOnlyOptimal
        }),
        _ => false,
    })
    .expect("sampled texture is transitioned");
    let draw = position(&commands, |command| matches!(command, Command::Draw { .. })).unwrap();
    assert!(barrier < draw);
    list.end().unwrap();
}

#[rstest]
fn layout_transitions_chain(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(HeadlessConfig::default());
    let texture = device
        .create_texture(TextureInfo::texture_2d(
            32,
            32,
            1,
            1,
            PixelFormat::RGBA8Unorm,
            TextureUsage::SAMPLED,
        ))
        .unwrap();

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    let cb = list.command_buffer();
    for layout in [
        ImageLayout::TransferDstOptimal,
        ImageLayout::TransferSrcOptimal,
        ImageLayout::ShaderReadOnlyOptimal,
    ] {
        texture.transition_image_layout(cb, 0, 1, 0, 1, layout);
        assert_eq!(texture.layout(0, 0), layout);
    }

    let transitions: Vec<_> = driver
        .commands(cb)
        .into_iter()
        .flat_map(|command| match command {
            Command::PipelineBarrier { image_barriers, .. } => image_barriers,
            _ => Vec::new(),
        })
        .filter(|barrier| barrier.image == texture.image())
        .map(|barrier| (barrier.old_layout, barrier.new_layout))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (ImageLayout::ShaderReadOnlyOptimal, ImageLayout::TransferDstOptimal),
            (ImageLayout::TransferDstOptimal, ImageLayout::TransferSrcOptimal),
            (ImageLayout::TransferSrcOptimal, ImageLayout::ShaderReadOnlyOptimal),
        ]
    );
    list.end().unwrap();
}

#[rstest]
#[case(Vec::new(), Filter::Linear)]
#[case(vec![PixelFormat::RGBA8Unorm], Filter::Nearest)]
fn texture_copies_record_transfer_commands(
    #[from(logging)] _logging: (),
    #[case] unfilterable_formats: Vec<PixelFormat>,
    #[case] filter: Filter,
) {
    let (driver, device) = headless(HeadlessConfig {
        unfilterable_formats,
        ..HeadlessConfig::default()
    });
    let sampled = |usage: TextureUsage, mips: u32| {
        device
            .create_texture(TextureInfo::texture_2d(
                64,
                64,
                mips,
                1,
                PixelFormat::RGBA8Unorm,
                usage,
            ))
            .unwrap()
    };
    let src = sampled(TextureUsage::SAMPLED, 1);
    let dst = sampled(TextureUsage::SAMPLED, 1);
    let mipmapped = sampled(TextureUsage::SAMPLED | TextureUsage::GENERATE_MIPMAPS, 3);
    let multisampled = device
        .create_texture(TextureInfo {
            samples: TextureSampleCount::Count4,
            ..TextureInfo::texture_2d(64, 64, 1, 1, PixelFormat::RGBA8Unorm, TextureUsage::RENDER_TARGET)
        })
        .unwrap();
    let resolved = sampled(TextureUsage::SAMPLED, 1);

    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();
    list.copy_texture_all(&src, &dst).unwrap();
    list.generate_mipmaps(&mipmapped).unwrap();
    list.resolve_texture(&multisampled, &resolved).unwrap();
    assert!(list.resolve_texture(&resolved, &multisampled).is_err());
    list.end().unwrap();

    let commands = driver.commands(list.command_buffer());
    let copies = commands
        .iter()
        .filter(|command| {
            matches!(command, Command::CopyImage { src: from, dst: to, .. }
                if *from == src.image() && *to == dst.image())
        })
        .count();
    assert_eq!(copies, 1);

    let blits: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            Command::BlitImage {
                src, dst, filter, ..
            } if *src == mipmapped.image() && *dst == mipmapped.image() => Some(*filter),
            _ => None,
        })
        .collect();
    assert_eq!(blits, vec![filter; 2]);
    assert_eq!(mipmapped.layout(2, 0), ImageLayout::ShaderReadOnlyOptimal);

    let resolves = commands
        .iter()
        .filter(|command| {
            matches!(command, Command::ResolveImage { src, dst, .. }
                if *src == multisampled.image() && *dst == resolved.image())
        })
        .count();
    assert_eq!(resolves, 1);
    assert_eq!(driver.take_validation_error(), None);
}

#[rstest]
fn failed_end_leaves_list_recording(#[from(logging)] _logging: ()) {
    let (driver, device) = headless(HeadlessConfig::default());
    let mut list = device.create_command_list().unwrap();
    list.begin().unwrap();

    driver.inject_failure("vkEndCommandBuffer", ResultCode::OutOfDeviceMemory);
    assert!(matches!(list.end(), Err(Error::OutOfMemory { .. })));

    // Nothing ended, so there is nothing to submit yet.
    assert!(matches!(
        device.submit_commands(&mut list, None),
        Err(Error::InvalidOperation { .. })
    ));

    list.end().unwrap();
    device.submit_commands(&mut list, None).unwrap();
}

#[rstest]
fn zero_extent_surface_defers_swapchain_creation(#[from(logging)] _logging: ()) {
    let mut config = HeadlessConfig::default();
    let capabilities = config.surface.capabilities;
    config.surface.capabilities = SurfaceCapabilities {
        current_extent: Extent2::new(0, 0),
        min_extent: Extent2::new(0, 0),
        max_extent: Extent2::new(0, 0),
        ..capabilities
    };
    let driver = Arc::new(HeadlessDriver::new(config));
    let options = GraphicsDeviceOptions {
        has_main_swapchain: true,
        ..GraphicsDeviceOptions::default()
    };
    let device = Device::new(
        driver.clone(),
        options,
        Some(SwapchainInfo::new(window(), 800, 600)),
    )
    .unwrap();
    let swapchain = device.main_swapchain().unwrap();
    assert!(swapchain.native().is_null());

    assert!(!swapchain.acquire_next_image().unwrap());
    device.swap_main_buffers().unwrap();
    device.resize_main_window(100, 100).unwrap();
    assert!(swapchain.native().is_null());
    assert!(driver.created_swapchains().is_empty());
    assert!(driver.presents().is_empty());

    // Window is visible again.
    driver.set_surface_capabilities(capabilities);
    assert!(!swapchain.acquire_next_image().unwrap());
    assert!(!swapchain.native().is_null());
    assert_eq!(driver.created_swapchains().len(), 1);
    assert_eq!(swapchain.framebuffer().width(), 100);

    assert!(swapchain.acquire_next_image().unwrap());
    device.swap_main_buffers().unwrap();
    assert_eq!(driver.presents().len(), 1);
    assert_eq!(driver.take_validation_error(), None);
}

use std::time::Instant;

use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use tracing_error::ErrorLayer;
use tracing_subscriber::{prelude::*, EnvFilter};
use winit::{
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::Window,
};

fn main() -> eyre::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .with(ErrorLayer::default())
        .init();
    color_eyre::install()?;

    let event_loop = EventLoop::new();
    let window = Window::new(&event_loop)?;
    window.set_title("strata");

    let size = window.inner_size();
    let source = strata::native::SurfaceSource {
        window: window.raw_window_handle(),
        display: window.raw_display_handle(),
    };

    let device = strata::Device::vulkan(
        strata::GraphicsDeviceOptions {
            debug: cfg!(debug_assertions),
            sync_to_vertical_blank: true,
            swapchain_srgb_format: true,
            prefer_standard_clip_space_y_direction: true,
            has_main_swapchain: true,
            ..strata::GraphicsDeviceOptions::default()
        },
        Some(strata::SwapchainInfo::new(source, size.width, size.height)),
    )?;
    tracing::info!("Running on {}", device.info().device_name);

    let mut list = device.create_command_list()?;
    list.set_name("Frame");
    let start = Instant::now();

    event_loop.run(move |event, _target, flow| {
        *flow = ControlFlow::Poll;

        let result = (|| -> eyre::Result<()> {
            match event {
                Event::WindowEvent {
                    event: WindowEvent::CloseRequested,
                    ..
                } => {
                    device.wait_for_idle()?;
                    *flow = ControlFlow::Exit;
                }
                Event::WindowEvent {
                    event: WindowEvent::Resized(size),
                    ..
                } => {
                    device.resize_main_window(size.width, size.height)?;
                }
                Event::WindowEvent {
                    event:
                        WindowEvent::KeyboardInput {
                            input:
                                KeyboardInput {
                                    state: ElementState::Pressed,
                                    virtual_keycode: Some(VirtualKeyCode::V),
                                    ..
                                },
                            ..
                        },
                    ..
                } => {
                    if let Some(swapchain) = device.main_swapchain() {
                        let vsync = !swapchain.sync_to_vertical_blank();
                        swapchain.set_sync_to_vertical_blank(vsync);
                        tracing::info!("Vsync {}", if vsync { "on" } else { "off" });
                    }
                }
                Event::MainEventsCleared => window.request_redraw(),
                Event::RedrawRequested(_) => {
                    let swapchain = match device.main_swapchain() {
                        Some(swapchain) => swapchain,
                        None => return Ok(()),
                    };

                    let t = start.elapsed().as_secs_f32();
                    let color = strata::RgbaFloat::new(
                        0.5 + 0.5 * t.sin(),
                        0.3,
                        0.5 + 0.5 * (t * 0.7).cos(),
                        1.0,
                    );

                    list.begin()?;
                    list.set_framebuffer(swapchain.framebuffer())?;
                    list.clear_color_target(0, color)?;
                    list.end()?;
                    device.submit_commands(&mut list, None)?;
                    device.swap_main_buffers()?;
                }
                _ => {}
            }
            Ok(())
        })();

        if let Err(err) = result {
            tracing::error!("{:?}", err);
            *flow = ControlFlow::Exit;
        }
    })
}

use std::process::ExitCode;

use tracing::{error, info};

use va_backend::types::{
    ConfigAttribType, ConfigAttribute, FourCc, RT_FORMAT_YUV420, SURFACE_MEM_TYPE_DRM_PRIME_2,
};
use va_backend::{driver_init, Driver, DriverConfig, DriverInfo};

struct Args {
    device: Option<u32>,
    verbose: bool,
    export: Option<(u32, u32)>,
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once(['x', 'X'])?;
    let (w, h) = (w.parse().ok()?, h.parse().ok()?);
    (w > 0 && h > 0).then_some((w, h))
}

fn parse_args() -> Args {
    let mut args = Args {
        device: None,
        verbose: false,
        export: None,
    };

    let argv: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--device" | "-d" => {
                if i + 1 < argv.len() {
                    args.device = argv[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--export" | "-e" => {
                if i + 1 < argv.len() {
                    args.export = parse_size(&argv[i + 1]);
                    if args.export.is_none() {
                        eprintln!("ignoring invalid --export size {:?}", argv[i + 1]);
                    }
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                args.verbose = true;
            }
            "--help" | "-h" => {
                println!("nvdec-vainfo - inspect the VA-API -> NVDEC backend");
                println!();
                println!("Usage: nvdec-vainfo [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --device <N>     GPU ordinal (default: $NVD_GPU or 0)");
                println!("  -e, --export <WxH>   Export a blank WxH surface as dma-buf");
                println!("  -v, --verbose        Enable debug logging");
                println!("  -h, --help           Show this help");
                std::process::exit(0);
            }
            other => eprintln!("ignoring unknown argument {other:?}"),
        }
        i += 1;
    }
    args
}

fn print_capabilities(driver: &mut Driver, info: &DriverInfo) {
    println!("vendor: {} ({}.{})", info.vendor, info.version_major, info.version_minor);
    println!("device: {}", driver.device_name());

    let vt = &info.vtable;
    let profiles = match (vt.query_config_profiles)(driver) {
        Ok(profiles) => profiles,
        Err(e) => {
            error!(error = %e, "failed to query profiles");
            return;
        }
    };

    for profile in profiles {
        let entrypoints = (vt.query_config_entrypoints)(driver, profile).unwrap_or_default();
        for entrypoint in entrypoints {
            let mut attrs = [
                ConfigAttribute { kind: ConfigAttribType::RtFormat, value: 0 },
                ConfigAttribute { kind: ConfigAttribType::MaxPictureWidth, value: 0 },
                ConfigAttribute { kind: ConfigAttribType::MaxPictureHeight, value: 0 },
            ];
            if let Err(e) = (vt.get_config_attributes)(driver, profile, entrypoint, &mut attrs) {
                error!(?profile, error = %e, "failed to query attributes");
                continue;
            }
            println!(
                "  {profile:?} / {entrypoint:?}: rt_format={:#x} max={}x{}",
                attrs[0].value, attrs[1].value, attrs[2].value
            );
        }
    }

    for format in (vt.query_image_formats)(driver) {
        println!("  image format {}", FourCc(format.fourcc));
    }
}

fn export_blank(driver: &mut Driver, info: &DriverInfo, width: u32, height: u32) -> bool {
    let vt = &info.vtable;
    let surfaces = match (vt.create_surfaces)(driver, RT_FORMAT_YUV420, width, height, 1) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create surface");
            return false;
        }
    };

    let ok = match (vt.export_surface_handle)(driver, surfaces[0], SURFACE_MEM_TYPE_DRM_PRIME_2, 0) {
        Ok(desc) => {
            println!("exported {}x{} as {}", desc.width, desc.height, FourCc(desc.fourcc));
            for (i, (object, layer)) in desc.objects.iter().zip(&desc.layers).enumerate() {
                println!(
                    "  plane {i}: {} size={} modifier={:#x} offset={} pitch={}",
                    FourCc(layer.drm_format),
                    object.size,
                    object.modifier,
                    layer.offset,
                    layer.pitch
                );
            }
            true
        }
        Err(e) => {
            error!(error = %e, "export failed");
            false
        }
    };

    if let Err(e) = (vt.destroy_surfaces)(driver, &surfaces) {
        error!(error = %e, "failed to destroy surface");
    }
    ok
}

fn main() -> ExitCode {
    let args = parse_args();

    let filter = if args.verbose {
        "va_backend=debug,nvdec_device=debug,nvdec_vainfo=debug"
    } else {
        "va_backend=info,nvdec_device=info,nvdec_vainfo=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    let mut config = DriverConfig::from_env();
    if let Some(device) = args.device {
        config.gpu = device;
    }
    info!(gpu = config.gpu, fifo_length = config.fifo_length, "opening backend");

    let backend = match nvdec_device::open(&config) {
        Ok(backend) => backend,
        Err(e) => {
            error!(error = %e, "failed to open NVDEC backend");
            return ExitCode::FAILURE;
        }
    };
    let (mut driver, info) = driver_init(backend.device, backend.stream, config);

    print_capabilities(&mut driver, &info);

    let mut ok = true;
    if let Some((width, height)) = args.export {
        ok = export_blank(&mut driver, &info, width, height);
    }

    if let Err(e) = (info.vtable.terminate)(&mut driver) {
        error!(error = %e, "terminate failed");
    }
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

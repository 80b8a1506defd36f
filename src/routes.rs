use crate::{
    api::{attendance, day_assignment, day_pattern, period_slot, shift, timetable},
    auth::middleware::auth_middleware,
    config::Config,
    utils::response::{json_error, path_error, query_error},
};
use actix_governor::{Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware};
use actix_web::{middleware::from_fn, web};

// Falls back to the crate's default quota if the builder rejects the numbers.
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let per_ms = if requests_per_min == 0 {
        1
    } else {
        (60_000 / requests_per_min as u64).max(1)
    };
    let cfg = GovernorConfigBuilder::default()
        .milliseconds_per_request(per_ms)
        .burst_size(requests_per_min.max(1))
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_default();
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config) {
    let protected_limiter = build_limiter(config.rate_protected_per_min);

    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .app_data(web::PathConfig::default().error_handler(path_error));

    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(template_scope(
                "/shifts",
                TemplateHandlers {
                    create: web::post().to(shift::create_shift),
                    list: web::get().to(shift::list_shifts),
                    get: web::get().to(shift::get_shift),
                    update: web::put().to(shift::update_shift),
                    delete: web::delete().to(shift::delete_shift),
                    toggle: web::post().to(shift::toggle_shift),
                },
            ))
            .service(template_scope(
                "/day-patterns",
                TemplateHandlers {
                    create: web::post().to(day_pattern::create_day_pattern),
                    list: web::get().to(day_pattern::list_day_patterns),
                    get: web::get().to(day_pattern::get_day_pattern),
                    update: web::put().to(day_pattern::update_day_pattern),
                    delete: web::delete().to(day_pattern::delete_day_pattern),
                    toggle: web::post().to(day_pattern::toggle_day_pattern),
                },
            ))
            .service(template_scope(
                "/period-slots",
                TemplateHandlers {
                    create: web::post().to(period_slot::create_period_slot),
                    list: web::get().to(period_slot::list_period_slots),
                    get: web::get().to(period_slot::get_period_slot),
                    update: web::put().to(period_slot::update_period_slot),
                    delete: web::delete().to(period_slot::delete_period_slot),
                    toggle: web::post().to(period_slot::toggle_period_slot),
                },
            ))
            .service(
                web::scope("/day-pattern-assignments")
                    // /day-pattern-assignments
                    .service(web::resource("").route(web::get().to(day_assignment::list_day_assignments)))
                    // /day-pattern-assignments/{day_of_week}
                    .service(
                        web::resource("/{day_of_week}")
                            .route(web::get().to(day_assignment::get_day_assignment))
                            .route(web::put().to(day_assignment::upsert_day_assignment)),
                    ),
            )
            .service(
                web::scope("/timetables")
                    // /timetables
                    .service(
                        web::resource("")
                            .route(web::get().to(timetable::list_timetables))
                            .route(web::post().to(timetable::create_timetable)),
                    )
                    // /timetables/conflicts, before /{id}
                    .service(web::resource("/conflicts").route(web::get().to(timetable::check_conflict)))
                    // /timetables/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(timetable::get_timetable))
                            .route(web::put().to(timetable::rename_timetable))
                            .route(web::delete().to(timetable::delete_timetable)),
                    )
                    .service(web::resource("/{id}/publish").route(web::post().to(timetable::publish_timetable)))
                    .service(web::resource("/{id}/archive").route(web::post().to(timetable::archive_timetable)))
                    // /timetables/{id}/entries
                    .service(
                        web::resource("/{id}/entries")
                            .route(web::get().to(timetable::list_entries))
                            .route(web::post().to(timetable::upsert_entry)),
                    )
                    .service(
                        web::resource("/{id}/entries/bulk").route(web::post().to(timetable::bulk_upsert_entries)),
                    )
                    .service(
                        web::resource("/{id}/entries/{entry_id}").route(web::delete().to(timetable::delete_entry)),
                    ),
            )
            .service(
                web::scope("/student-attendance")
                    // static paths first, /{id} would swallow them
                    .service(web::resource("/periods").route(web::get().to(attendance::list_periods)))
                    .service(web::resource("/summary").route(web::get().to(attendance::day_summary)))
                    .service(
                        web::resource("/edit-window-policy")
                            .route(web::get().to(attendance::get_policy))
                            .route(web::put().to(attendance::update_policy)),
                    )
                    // /student-attendance/period/{period_slot_id}
                    .service(
                        web::resource("/period/{period_slot_id}")
                            .route(web::get().to(attendance::get_roster))
                            .route(web::post().to(attendance::mark_roster)),
                    )
                    // /student-attendance/{id}
                    .service(web::resource("/{id}").route(web::put().to(attendance::edit_record)))
                    .service(web::resource("/{id}/history").route(web::get().to(attendance::history)))
                    .service(web::resource("/{id}/edit-status").route(web::get().to(attendance::edit_status))),
            ),
    );
}

struct TemplateHandlers {
    create: actix_web::Route,
    list: actix_web::Route,
    get: actix_web::Route,
    update: actix_web::Route,
    delete: actix_web::Route,
    toggle: actix_web::Route,
}

/// Shifts, day patterns and period slots share one CRUD + toggle layout.
fn template_scope(path: &str, handlers: TemplateHandlers) -> actix_web::Scope {
    web::scope(path)
        .service(web::resource("").route(handlers.create).route(handlers.list))
        .service(
            web::resource("/{id}")
                .route(handlers.get)
                .route(handlers.update)
                .route(handlers.delete),
        )
        .service(web::resource("/{id}/toggle-active").route(handlers.toggle))
}

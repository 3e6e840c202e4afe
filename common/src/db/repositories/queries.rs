// SQL column lists shared by the repositories

/// Columns of the procs table
pub mod proc_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"name, description, image, command, env_vars,
        resources, proc_group, author, contributors, args"#;
}

/// Columns of the schedules table
pub mod schedule_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"id, proc_name, args, cron_time, timezone,
        schedule_group, notify_emails, tags, user_email, enabled,
        last_triggered_at, created_at"#;
}

/// Columns of the executions table
pub mod execution_queries {
    /// `reason` is NULL until the execution reaches a terminal state
    pub const SELECT_ALL_COLUMNS: &str = r#"name, proc_name, image_tag, command, env,
        requester, status, reason, created_at, updated_at"#;
}

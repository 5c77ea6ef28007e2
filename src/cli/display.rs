//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use crate::cluster::{
    ClusterStatus, HealthState, HealthSummary, Node, NodeRemoval, RouteResponse, Service,
};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut output = String::new();
    push_row(&mut output, headers.iter().map(|h| h.to_uppercase()), &widths);
    for row in rows {
        push_row(&mut output, row.into_iter(), &widths);
    }
    output
}

fn push_row(output: &mut String, cells: impl Iterator<Item = String>, widths: &[usize]) {
    let mut line = String::new();
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            line.push_str("   ");
        }
        match widths.get(i) {
            Some(width) => line.push_str(&format!("{:width$}", cell, width = width)),
            None => line.push_str(&cell),
        }
    }
    output.push_str(line.trim_end());
    output.push('\n');
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value)
}

// ============================================================================
// Service display
// ============================================================================

/// Format service list for display
pub fn format_service_list(services: &[Service]) -> String {
    let headers = &["ID", "NAME", "IMAGE", "PORT", "READY"];
    let rows: Vec<Vec<String>> = services
        .iter()
        .map(|s| {
            vec![
                s.id.clone(),
                s.name.clone(),
                s.image.clone(),
                s.port.to_string(),
                format!("{}/{}", s.running_count(), s.replicas),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format a single service with its containers
pub fn format_service_detail(service: &Service) -> String {
    let mut output = String::new();

    output.push_str(&format!("Name:        {}\n", service.name));
    output.push_str(&format!("ID:          {}\n", service.id));
    output.push_str(&format!("Image:       {}\n", service.image));
    output.push_str(&format!("Port:        {}\n", service.port));
    output.push_str(&format!(
        "Replicas:    {} desired, {} running\n",
        service.replicas,
        service.running_count()
    ));
    output.push_str(&format!("Generation:  {}\n", service.generation));
    output.push_str(&format!(
        "Updated:     {}\n",
        service.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    if let Some(check) = &service.health_check {
        output.push_str(&format!(
            "Health:      GET {} every {}s, timeout {}s, {} retries\n",
            check.path, check.interval_secs, check.timeout_secs, check.retries
        ));
    }

    if !service.environment.is_empty() {
        output.push_str("Environment:\n");
        for var in service.env_vars() {
            output.push_str(&format!("  {}\n", var));
        }
    }

    output.push_str("\nContainers:\n");
    let rows: Vec<Vec<String>> = service
        .containers
        .iter()
        .map(|c| {
            vec![
                c.name.clone(),
                c.status.to_string(),
                c.node_id.clone(),
                if c.ip.is_empty() { "-".to_string() } else { c.ip.clone() },
                c.port.to_string(),
            ]
        })
        .collect();
    output.push_str(&format_table(&["NAME", "STATUS", "NODE", "IP", "PORT"], rows));

    output
}

// ============================================================================
// Node display
// ============================================================================

/// Format node list for display
pub fn format_node_list(nodes: &[Node]) -> String {
    let headers = &["ID", "NAME", "STATUS", "ADDRESS", "CPU", "MEMORY", "CONTAINERS"];
    let rows: Vec<Vec<String>> = nodes
        .iter()
        .map(|n| {
            vec![
                n.id.clone(),
                n.name.clone(),
                n.status.to_string(),
                n.address.clone(),
                percent(n.usage.cpu_usage),
                percent(n.usage.memory_usage),
                n.container_count().to_string(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format a single node
pub fn format_node_detail(node: &Node) -> String {
    let mut output = String::new();

    output.push_str(&format!("Name:       {}\n", node.name));
    output.push_str(&format!("ID:         {}\n", node.id));
    output.push_str(&format!("Address:    {}\n", node.address));
    output.push_str(&format!("Status:     {}\n", node.status));
    output.push_str(&format!(
        "Usage:      cpu {}, memory {}, disk {}\n",
        percent(node.usage.cpu_usage),
        percent(node.usage.memory_usage),
        percent(node.usage.disk_usage)
    ));
    output.push_str(&format!(
        "Last seen:  {}\n",
        node.last_seen.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    if !node.labels.is_empty() {
        let mut labels: Vec<_> = node.labels.iter().collect();
        labels.sort();
        output.push_str("Labels:\n");
        for (key, value) in labels {
            output.push_str(&format!("  {}={}\n", key, value));
        }
    }

    output.push_str(&format!("Containers: {}\n", node.container_count()));
    for id in &node.containers {
        output.push_str(&format!("  - {}\n", id));
    }

    output
}

/// Format the outcome of draining and removing a node
pub fn format_node_removal(removal: &NodeRemoval) -> String {
    format!(
        "node/{} removed: {} containers, {} migrated, {} failed\n",
        removal.node_id, removal.attempted, removal.migrated, removal.failed
    )
}

// ============================================================================
// Routing and status display
// ============================================================================

/// Format a routing decision
pub fn format_route(route: &RouteResponse) -> String {
    let mut output = format!(
        "{} -> {} ({}) on node {}, port {}\n",
        route.service_id,
        route.container_name,
        if route.ip.is_empty() { "no ip" } else { route.ip.as_str() },
        route.node_id,
        route.port
    );
    if !route.differentiated {
        output.push_str(&format!(
            "note: strategy {} selected like round_robin\n",
            route.strategy
        ));
    }
    output
}

/// Format cluster status
pub fn format_cluster_status(status: &ClusterStatus) -> String {
    let mut output = String::new();

    output.push_str("Cluster Status\n");
    output.push_str("==============\n");
    output.push_str(&format!(
        "Nodes:       {} ({} active)\n",
        status.stats.total_nodes, status.stats.active_nodes
    ));
    output.push_str(&format!("Services:    {}\n", status.stats.total_services));
    output.push_str(&format!(
        "Containers:  {} ({} running)\n",
        status.stats.total_containers, status.stats.running_containers
    ));
    output.push_str(&format!("Scheduling:  {}\n", status.scheduling_strategy));
    output.push_str(&format!("Balancing:   {}\n", status.load_balance_strategy));
    output.push_str(&format!("Runtime:     {}\n", status.runtime));

    output
}

/// Format container health
pub fn format_health(summary: &HealthSummary) -> String {
    let mut output = format!(
        "Health: {} ({} healthy, {} unhealthy, {} unknown)\n",
        summary.status(),
        summary.healthy,
        summary.unhealthy,
        summary.unknown
    );

    let rows: Vec<Vec<String>> = summary
        .containers
        .iter()
        .map(|c| {
            let state = match c.state {
                HealthState::Healthy => "healthy",
                HealthState::Unhealthy => "unhealthy",
                HealthState::Unknown => "unknown",
            };
            let last = c
                .last_probe
                .as_ref()
                .map(|p| match &p.error {
                    Some(e) => e.clone(),
                    None => format!("{}ms", p.latency_ms),
                })
                .unwrap_or_else(|| "-".to_string());
            vec![
                c.service_name.clone(),
                c.container_name.clone(),
                state.to_string(),
                c.consecutive_failures.to_string(),
                last,
            ]
        })
        .collect();
    output.push_str(&format_table(
        &["SERVICE", "CONTAINER", "STATE", "FAILURES", "LAST PROBE"],
        rows,
    ));

    output
}

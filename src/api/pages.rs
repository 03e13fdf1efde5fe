//! Static HTML pages served by `/listen` and `/status`

/// Live traffic viewer backed by `/listen/ws`
pub const LISTEN_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Pilosa - streaming client</title></head><body>
<style type="text/css">
    dt.inbound { background-color: #efe; }
    dt.outbound { background-color: #eef; }
    dd pre { margin: 0 0 1em 0; }
</style>
<dl id="traffic"></dl>
<script type="text/javascript">
    const list = document.getElementById("traffic");
    list.addEventListener("click", (e) => {
        if (e.target.tagName === "DT") {
            const dd = e.target.nextElementSibling;
            dd.style.display = dd.style.display === "none" ? "" : "none";
        }
    });
    const scheme = window.location.protocol === "https:" ? "wss://" : "ws://";
    const ws = new WebSocket(scheme + window.location.host + "/listen/ws");
    ws.onmessage = (msg) => {
        const frame = JSON.parse(msg.data);
        const dt = document.createElement("dt");
        if (frame.host) {
            dt.className = "outbound";
            dt.textContent = "→ " + frame.type + " (to: " + frame.host + ")";
        } else {
            dt.className = "inbound";
            dt.textContent = "← " + frame.type;
        }
        const dd = document.createElement("dd");
        dd.style.display = "none";
        const pre = document.createElement("pre");
        pre.textContent = frame.dump;
        dd.appendChild(pre);
        list.appendChild(dt);
        list.appendChild(dd);
    };
</script>
</body></html>
"#;

/// Process table with per-process ping buttons
pub const STATUS_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Pilosa - status</title></head><body>
<style type="text/css">
    td { background: #eee; }
</style>
<table id="processes">
    <tr><th>process id</th><th>host</th><th>tcp port</th><th>http port</th><th>latency</th></tr>
</table>
<script type="text/javascript">
    const table = document.getElementById("processes");
    fetch("/processes").then((resp) => resp.json()).then((processes) => {
        for (const [id, info] of Object.entries(processes)) {
            const row = table.insertRow();
            for (const value of [id, info.host, info.port_tcp, info.port_http]) {
                row.insertCell().textContent = value;
            }
            const cell = row.insertCell();
            const button = document.createElement("button");
            button.textContent = "ping";
            button.onclick = () => {
                fetch("/ping?process=" + encodeURIComponent(id))
                    .then((resp) => resp.json())
                    .then((result) => { cell.textContent = result.duration; });
            };
            cell.appendChild(button);
        }
    });
</script>
</body></html>
"#;

use crate::types::ProjectType;

const STATIC_DOCKERFILE: &str = "\
FROM nginx:alpine
COPY . /usr/share/nginx/html
EXPOSE 80
";

const SPA_DOCKERFILE: &str = "\
FROM node:20-alpine AS build
WORKDIR /app
COPY package*.json ./
RUN npm install
COPY . .
RUN npm run build
FROM nginx:alpine
COPY --from=build /app/dist /usr/share/nginx/html
EXPOSE 80
";

const API_DOCKERFILE: &str = "\
FROM node:20-alpine
WORKDIR /app
COPY package*.json ./
RUN npm install --omit=dev
COPY . .
EXPOSE 3000
CMD [\"node\", \"server.js\"]
";

const FULLSTACK_DOCKERFILE: &str = "\
FROM node:20-alpine AS build
WORKDIR /app
COPY package*.json ./
RUN npm install
COPY . .
RUN npm run build
FROM node:20-alpine
WORKDIR /app
COPY --from=build /app .
EXPOSE 3000
CMD [\"node\", \"server.js\"]
";

const PYTHON_WORKER_DOCKERFILE: &str = "\
FROM python:3.12-slim
WORKDIR /app
RUN pip install --no-cache-dir supervisor
COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt
COPY . .
EXPOSE 8080
CMD [\"supervisord\", \"-c\", \"supervisord.conf\"]
";

const NODE_WORKER_DOCKERFILE: &str = "\
FROM node:20-alpine
WORKDIR /app
COPY package*.json ./
RUN npm install --omit=dev
COPY . .
EXPOSE 3000
CMD [\"sh\", \"-c\", \"node bot.js & node server.js & wait\"]
";

/// Dockerfile the scaffold agent must reproduce verbatim.
pub fn dockerfile(project_type: ProjectType) -> &'static str {
    match project_type {
        ProjectType::Static => STATIC_DOCKERFILE,
        ProjectType::Spa => SPA_DOCKERFILE,
        ProjectType::Api => API_DOCKERFILE,
        ProjectType::PythonWorker => PYTHON_WORKER_DOCKERFILE,
        ProjectType::NodeWorker => NODE_WORKER_DOCKERFILE,
        ProjectType::Fullstack | ProjectType::Unknown => FULLSTACK_DOCKERFILE,
    }
}

/// Constraints injected into the Architect's prompt.
pub fn architecture_guidance(project_type: ProjectType) -> &'static str {
    match project_type {
        ProjectType::Static => "\
- Static HTML/CSS/JS only, no build step and no package.json
- One index.html entry point, assets under css/ and js/
- All content served as-is by nginx",
        ProjectType::Spa => "\
- Single-page app built with Vite; output goes to dist/
- Client-side routing only, no server code
- API calls, if any, target external services",
        ProjectType::Api => "\
- Node.js + Express JSON API listening on port 3000
- Routes under src/routes/, one file per resource
- No frontend pages, no template engine",
        ProjectType::Fullstack => "\
- Node.js + Express backend on port 3000 serving the built frontend
- Frontend under client/, backend under server/
- REST endpoints under /api, pages served from the build output",
        ProjectType::PythonWorker => "\
- Python worker process (bot.py) plus a Flask dashboard on port 8080
- Both processes run under supervisord
- Shared state goes through a small SQLite or JSON file",
        ProjectType::NodeWorker => "\
- Node.js worker process (bot.js) plus an Express status server on port 3000
- Both processes started concurrently from the same container
- Worker state exposed through the status endpoints",
        ProjectType::Unknown => "\
- Default to a Node.js fullstack layout on port 3000",
    }
}

/// Files the scaffold agent must create.
pub fn scaffold_guidance(project_type: ProjectType) -> &'static str {
    match project_type {
        ProjectType::Static => "\
- index.html with the full page structure
- css/style.css and js/main.js
- Dockerfile (exactly the provided template)",
        ProjectType::Spa => "\
- package.json with vite and the chosen framework
- index.html, src/main entry, src/App component
- Dockerfile (exactly the provided template)",
        ProjectType::Api => "\
- package.json with express
- server.js binding 0.0.0.0:3000
- src/routes/ with a health route
- Dockerfile (exactly the provided template)",
        ProjectType::Fullstack => "\
- package.json with express and the frontend toolchain
- server/server.js binding 0.0.0.0:3000, client/ sources
- Dockerfile (exactly the provided template)",
        ProjectType::PythonWorker => "\
- requirements.txt with flask and the worker's libraries
- bot.py (worker loop) and app.py (Flask dashboard on 0.0.0.0:8080)
- supervisord.conf starting both programs
- Dockerfile (exactly the provided template)",
        ProjectType::NodeWorker => "\
- package.json with express
- bot.js (worker loop) and server.js (status server on 0.0.0.0:3000)
- Dockerfile (exactly the provided template)",
        ProjectType::Unknown => "\
- package.json, server.js on 0.0.0.0:3000
- Dockerfile (exactly the provided template)",
    }
}

/// Port exposed by the container, used when creating the deployment domain.
pub fn exposed_port(project_type: ProjectType) -> u16 {
    match project_type {
        ProjectType::Static | ProjectType::Spa => 80,
        ProjectType::Api | ProjectType::Fullstack | ProjectType::NodeWorker => 3000,
        ProjectType::PythonWorker => 8080,
        ProjectType::Unknown => 3000,
    }
}
